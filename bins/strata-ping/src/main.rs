//! Round-trip latency between two logs in one process.
//!
//! The main thread publishes timestamped pings on the ping log and polls the
//! pong log; a second thread echoes every ping back. Both sides use the
//! caller-driven retry loop: offer until accepted, poll until something
//! arrives.

use anyhow::{Context, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use strata_buffer::AtomicBuffer;
use strata_config::StrataConfig;
use strata_counters::{AtomicCounter, CountersWriter, DirectoryLayout};
use strata_logbuffer::{Header, LogBuffers, LogConfig, OfferError, Publication, Subscription};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const PING_COUNTER_TYPE: i32 = 1;

struct PingCounters {
    sent: AtomicCounter,
    received: AtomicCounter,
    back_pressured: AtomicCounter,
    echoed: AtomicCounter,
}

impl PingCounters {
    fn allocate(writer: &mut CountersWriter) -> anyhow::Result<Self> {
        Ok(Self {
            sent: writer.allocate(PING_COUNTER_TYPE, "ping: messages sent")?,
            received: writer.allocate(PING_COUNTER_TYPE, "ping: messages received")?,
            back_pressured: writer.allocate(PING_COUNTER_TYPE, "ping: back pressured offers")?,
            echoed: writer.allocate(PING_COUNTER_TYPE, "pong: messages echoed")?,
        })
    }
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => StrataConfig::load(path).context("failed to load config")?,
        None => StrataConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let ping = &config.ping;
    let ping_path = config.log_path(&ping.ping_channel, ping.ping_stream_id);
    let pong_path = config.log_path(&ping.pong_channel, ping.pong_stream_id);
    if ping_path == pong_path {
        bail!("ping and pong resolve to the same log {}", ping_path.display());
    }
    // Each ping is timed by its first fragment, so it must fit in one frame.
    let max_payload = config.log.mtu.saturating_sub(strata_logbuffer::frame::HEADER_LENGTH);
    if ping.message_size > max_payload {
        bail!(
            "ping.message_size {} exceeds the {max_payload} byte frame payload",
            ping.message_size
        );
    }

    let mut counters = CountersWriter::create(
        config.counters_path(),
        DirectoryLayout::for_capacity(config.counters.capacity),
    )
    .context("failed to create counters")?;
    let stats = Arc::new(PingCounters::allocate(&mut counters)?);

    let session_id = std::process::id() as i32;
    let log_config = |stream_id: i32| {
        LogConfig::new(config.log.term_length)
            .with_mtu(config.log.mtu)
            .with_session_id(session_id)
            .with_stream_id(stream_id)
    };
    let ping_log = Arc::new(
        LogBuffers::create(&ping_path, &log_config(ping.ping_stream_id))
            .with_context(|| format!("failed to create {}", ping_path.display()))?,
    );
    let pong_log = Arc::new(
        LogBuffers::create(&pong_path, &log_config(ping.pong_stream_id))
            .with_context(|| format!("failed to create {}", pong_path.display()))?,
    );
    info!(
        ping = %ping_path.display(),
        pong = %pong_path.display(),
        term_length = config.log.term_length,
        "logs created"
    );

    // Subscribe before publishing so no ping or pong can be missed.
    let mut pong_subscription = Subscription::new(Arc::clone(&pong_log))?;
    let ping_subscription = Subscription::new(Arc::clone(&ping_log))?;
    let mut ping_publication = Publication::new(Arc::clone(&ping_log));
    let pong_publication = Publication::new(Arc::clone(&pong_log));

    let running = Arc::new(AtomicBool::new(true));
    let echo = {
        let running = Arc::clone(&running);
        let stats = Arc::clone(&stats);
        let fragment_limit = ping.fragment_limit;
        thread::Builder::new()
            .name("pong".into())
            .spawn(move || {
                run_pong(ping_subscription, pong_publication, &running, &stats, fragment_limit)
            })?
    };

    let epoch = Instant::now();
    let mut payload = vec![0u8; ping.message_size];

    info!(messages = ping.warmup_messages, "warming up");
    let mut discard = Vec::with_capacity(ping.warmup_messages as usize);
    round_trips(
        &mut ping_publication,
        &mut pong_subscription,
        &mut payload,
        epoch,
        ping.warmup_messages,
        ping.fragment_limit,
        &stats,
        &mut discard,
    )?;

    info!(messages = ping.messages, size = ping.message_size, "pinging");
    let mut latencies = Vec::with_capacity(ping.messages as usize);
    let start = Instant::now();
    round_trips(
        &mut ping_publication,
        &mut pong_subscription,
        &mut payload,
        epoch,
        ping.messages,
        ping.fragment_limit,
        &stats,
        &mut latencies,
    )?;
    let elapsed = start.elapsed();

    running.store(false, Ordering::Release);
    match echo.join() {
        Ok(result) => result?,
        Err(_) => bail!("pong thread panicked"),
    }

    report(&mut latencies, elapsed);
    info!(
        sent = stats.sent.get(),
        received = stats.received.get(),
        echoed = stats.echoed.get(),
        back_pressured = stats.back_pressured.get(),
        "counters"
    );
    Ok(())
}

fn now_nanos(epoch: Instant) -> i64 {
    epoch.elapsed().as_nanos() as i64
}

/// Offer until the log accepts `payload`, counting each refusal that
/// clears by itself.
fn offer_until_accepted(
    publication: &mut Publication,
    payload: &[u8],
    back_pressured: &AtomicCounter,
) -> anyhow::Result<i64> {
    loop {
        match publication.offer(payload) {
            Ok(position) => return Ok(position),
            Err(OfferError::BackPressured) => {
                back_pressured.increment();
                std::hint::spin_loop();
            }
            Err(e) if e.is_back_pressure() => std::hint::spin_loop(),
            Err(e) => return Err(e.into()),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn round_trips(
    publication: &mut Publication,
    subscription: &mut Subscription,
    payload: &mut [u8],
    epoch: Instant,
    count: u64,
    fragment_limit: usize,
    stats: &PingCounters,
    latencies: &mut Vec<i64>,
) -> anyhow::Result<()> {
    for _ in 0..count {
        payload[..8].copy_from_slice(&now_nanos(epoch).to_ne_bytes());
        offer_until_accepted(publication, payload, &stats.back_pressured)?;
        stats.sent.increment();

        loop {
            let polled = subscription.poll(
                &mut |buffer: &AtomicBuffer, offset: usize, _length: usize, _header: &Header| {
                    let sent = buffer.get_i64(offset);
                    latencies.push(now_nanos(epoch) - sent);
                },
                fragment_limit,
            )?;
            if polled > 0 {
                stats.received.add(polled as i64);
                break;
            }
            std::hint::spin_loop();
        }
    }
    Ok(())
}

fn run_pong(
    mut subscription: Subscription,
    mut publication: Publication,
    running: &AtomicBool,
    stats: &PingCounters,
    fragment_limit: usize,
) -> anyhow::Result<()> {
    let mut message = Vec::new();
    let mut failure: Option<anyhow::Error> = None;
    while running.load(Ordering::Acquire) {
        let polled = subscription.poll(
            &mut |buffer: &AtomicBuffer, offset: usize, length: usize, _header: &Header| {
                if failure.is_some() {
                    return;
                }
                message.clear();
                message.extend_from_slice(buffer.bytes(offset, length));
                match offer_until_accepted(&mut publication, &message, &stats.back_pressured) {
                    Ok(_) => {
                        stats.echoed.increment();
                    }
                    Err(e) => failure = Some(e),
                }
            },
            fragment_limit,
        )?;
        if let Some(e) = failure.take() {
            return Err(e.context("pong echo failed"));
        }
        if polled == 0 {
            std::hint::spin_loop();
        }
    }
    debug!(position = subscription.position(), "pong stopped");
    Ok(())
}

fn percentile(sorted: &[i64], p: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn report(latencies: &mut [i64], elapsed: Duration) {
    if latencies.is_empty() {
        println!("no round trips measured");
        return;
    }
    latencies.sort_unstable();
    let count = latencies.len();
    let mean = latencies.iter().map(|&l| l as f64).sum::<f64>() / count as f64;
    let variance =
        latencies.iter().map(|&l| (l as f64 - mean).powi(2)).sum::<f64>() / count as f64;

    println!(
        "round trips: {count} in {elapsed:?} ({:.0} msgs/sec)",
        count as f64 / elapsed.as_secs_f64()
    );
    for p in [50.0, 90.0, 99.0, 99.9, 99.99] {
        println!("  p{p:<6} {:>10} ns", percentile(latencies, p));
    }
    println!("  max     {:>10} ns", latencies[count - 1]);
    println!("  mean    {mean:>10.0} ns  stddev {:.0} ns", variance.sqrt());
}
