//! Scans racing a live writer.
//!
//! The writer thread stores an ascending sequence into one counter, each
//! value with its high half mirroring its low half, while also allocating and
//! reclaiming other slots. Every value a scan reports must therefore have
//! matching halves (no tearing) and must never go backwards, within a scan or
//! across scans (write order is respected).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use strata_counters::{Counter, CountersDirectory, CountersWriter, DirectoryLayout};

const STEPS_PER_ROUND: u64 = 256;
const ROUNDS: u64 = 200;

fn test_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("strata_counters_it_{label}_{}", std::process::id()))
}

fn mirrored(seq: u64) -> i64 {
    ((seq << 32) | seq) as i64
}

fn is_mirrored(value: i64) -> bool {
    let value = value as u64;
    value >> 32 == value & 0xFFFF_FFFF
}

#[test]
fn scan_never_observes_torn_or_reordered_values() {
    let path = test_path("torn");
    // One slot for the watched counter plus one per round of churn, since
    // reclaimed slots are never reused.
    let capacity = 1 + ROUNDS as usize;
    let mut writer = CountersWriter::create(&path, DirectoryLayout::for_capacity(capacity))
        .expect("create counters file");
    let watched = writer.allocate(1, "watched").expect("allocate watched counter");
    let directory = CountersDirectory::map(&path).expect("map counters file");

    let done = Arc::new(AtomicBool::new(false));
    let writer_done = Arc::clone(&done);
    let writer_thread = thread::spawn(move || {
        let mut seq = 0;
        for round in 0..ROUNDS {
            for _ in 0..STEPS_PER_ROUND {
                seq += 1;
                watched.set(mirrored(seq));
            }
            // Allocate and reclaim around the watched slot to exercise state flips.
            let counter = writer
                .allocate(2, &format!("churn-{round}"))
                .expect("allocate churn counter");
            writer.free(counter.id()).expect("free churn counter");
        }
        writer_done.store(true, Ordering::Release);
        seq
    });

    let mut last_seen = 0i64;
    let mut scans = 0u64;
    while !done.load(Ordering::Acquire) || scans == 0 {
        directory
            .scan(&mut |counter: Counter| {
                if counter.label == "watched" {
                    assert!(is_mirrored(counter.value), "torn value {:#018x}", counter.value);
                    assert!(
                        counter.value >= last_seen,
                        "{:#x} scanned after {last_seen:#x}",
                        counter.value
                    );
                    last_seen = counter.value;
                } else {
                    assert!(counter.label.starts_with("churn-"), "label {}", counter.label);
                    assert_eq!(counter.type_id, 2);
                }
            })
            .expect("scan");

        let looked_up = directory.get_value(0).expect("watched value");
        assert!(is_mirrored(looked_up), "torn value {looked_up:#018x}");
        assert!(looked_up >= last_seen, "{looked_up:#x} read after {last_seen:#x}");
        last_seen = looked_up;
        scans += 1;
    }

    let written = writer_thread.join().expect("writer thread panicked");
    assert_eq!(written, ROUNDS * STEPS_PER_ROUND);
    assert_eq!(directory.get_value(0).expect("watched value"), mirrored(written));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn file_backed_directory_scans_allocated_slots_only() {
    let path = test_path("layout");
    let mut writer = CountersWriter::create(&path, DirectoryLayout::for_capacity(4))
        .expect("create counters file");
    let unused = writer.allocate(0, "placeholder").expect("slot 0");
    let sent = writer.allocate(1, "bytes-sent").expect("slot 1");
    let reclaimed = writer.allocate(0, "placeholder").expect("slot 2");
    let errors = writer.allocate(2, "errors").expect("slot 3");
    writer.free(unused.id()).expect("free slot 0");
    writer.free(reclaimed.id()).expect("free slot 2");
    sent.set(42);

    let directory = CountersDirectory::map(&path).expect("map counters file");
    let mut seen = Vec::new();
    let visited = directory
        .scan(&mut |c: Counter| seen.push((c.id, c.label, c.value)))
        .expect("scan");

    assert_eq!(visited, 2);
    assert_eq!(
        seen,
        vec![
            (sent.id(), "bytes-sent".to_string(), 42),
            (errors.id(), "errors".to_string(), 0),
        ]
    );
    assert_eq!((sent.id(), errors.id()), (1, 3));
    let _ = std::fs::remove_file(&path);
}
