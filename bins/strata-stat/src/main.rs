use anyhow::Context;
use strata_config::StrataConfig;
use strata_counters::{Counter, CountersDirectory};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => StrataConfig::load(path).context("failed to load config")?,
        None => StrataConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = config.counters_path();
    let directory = CountersDirectory::map(&path)
        .with_context(|| format!("failed to map counters at {}", path.display()))?;
    info!(path = %path.display(), capacity = directory.layout().capacity(), "mapped counters");

    let visited = directory.scan(&mut |counter: Counter| {
        println!("[{}]={}\t\tlabel:{}", counter.id, counter.value, counter.label);
    })?;
    info!(visited, "scan complete");
    Ok(())
}
