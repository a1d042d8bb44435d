use anyhow::{Context as AnyhowContext, Result, bail};
use clap::Parser;
use relay_race::config::{Backoff, StoreConfig, WorkerConfig, WorkerTuning, parse_next_segments};
use relay_race::race::SegmentWorker;
use relay_race::store::RedisRaceStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay worker for a single track segment", long_about = None)]
struct Args {
    /// Id of the segment this worker serves (e.g. start-and-goal-1)
    #[arg(long)]
    segment_id: String,

    /// Comma separated ids of the following segments
    #[arg(long)]
    next: String,

    /// Store host
    #[arg(long, default_value = "redis")]
    store_host: String,

    /// Store port
    #[arg(long, default_value_t = 6379)]
    store_port: u16,

    /// Laps a token runs before it has finished
    #[arg(long, default_value_t = 3)]
    max_laps: u32,

    /// Count laps here. Only the start-goal segment of a track does.
    #[arg(long)]
    start_goal: bool,

    #[arg(long, default_value_t = 500)]
    work_delay_min_ms: u64,

    #[arg(long, default_value_t = 2000)]
    work_delay_max_ms: u64,

    /// Expiry of a successor lock held while forwarding
    #[arg(long, default_value_t = 5000)]
    lock_ttl_ms: u64,

    #[arg(long, default_value_t = 10)]
    backoff_initial_ms: u64,

    #[arg(long, default_value_t = 1000)]
    backoff_max_ms: u64,

    /// How long one blocking queue read waits
    #[arg(long, default_value_t = 250)]
    block_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let next = parse_next_segments(&args.next);
    if next.is_empty() {
        bail!("--next must name at least one segment");
    }

    let store_config = StoreConfig {
        host: args.store_host,
        port: args.store_port,
        block_timeout_ms: args.block_timeout_ms,
    };
    let tuning = WorkerTuning {
        work_delay_min_ms: args.work_delay_min_ms,
        work_delay_max_ms: args.work_delay_max_ms,
        lock_ttl_ms: args.lock_ttl_ms,
        backoff_initial_ms: args.backoff_initial_ms,
        backoff_max_ms: args.backoff_max_ms,
    };
    let config = WorkerConfig::new(args.segment_id, next)
        .start_goal(args.start_goal)
        .max_laps(args.max_laps)
        .store(store_config)
        .tuning(tuning);

    let url = config.store.url();
    info!(segment = %config.segment_id, store = %url, "connecting to store");
    let store = RedisRaceStore::connect_with_retry(
        &url,
        10,
        Backoff::new(Duration::from_millis(200), Duration::from_secs(5)),
    )
    .await
    .with_context(|| format!("Failed to connect to store at {}", url))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut worker = SegmentWorker::new(config, Arc::new(store));
    worker.run(cancel).await?;
    Ok(())
}
