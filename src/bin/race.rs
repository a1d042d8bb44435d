use anyhow::{Context as AnyhowContext, Result, bail};
use clap::{Args, Parser, Subcommand};
use relay_race::config::{Backoff, RaceConfig, WorkerTuning};
use relay_race::deploy::{Deployer, DockerDeployer, LocalDeployer};
use relay_race::race::{RaceCoordinator, RaceReport};
use relay_race::store::{MemoryRaceStore, RaceStore, RedisRaceStore};
use relay_race::track::generator::{generate_circular, generate_with_contention};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a race with docker containers and a redis store
    Run {
        #[command(flatten)]
        race: RaceArgs,
    },

    /// Run a race in this process on an in-memory store
    Local {
        #[command(flatten)]
        race: RaceArgs,

        /// Use millisecond work delays instead of the configured ones
        #[arg(long)]
        fast: bool,
    },

    /// Write a track definition file
    Generate {
        /// Number of tracks
        #[arg(long)]
        tracks: usize,

        /// Segments per track (base segments when contention points are used)
        #[arg(long)]
        length: usize,

        /// Output file
        #[arg(long, short, default_value = "tracks.json")]
        output: PathBuf,

        /// Position of the shared caesar segment (needs --bottleneck)
        #[arg(long, requires = "bottleneck")]
        caesar: Option<usize>,

        /// Position of the shared bottleneck segment (needs --caesar)
        #[arg(long, requires = "caesar")]
        bottleneck: Option<usize>,
    },
}

#[derive(Args)]
struct RaceArgs {
    /// YAML config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    tracks: Option<PathBuf>,

    #[arg(long)]
    results: Option<PathBuf>,

    #[arg(long)]
    tokens_per_track: Option<usize>,

    #[arg(long)]
    max_laps: Option<u32>,

    /// Monitoring window in seconds
    #[arg(long)]
    monitor_secs: Option<u64>,

    #[arg(long)]
    store_host: Option<String>,

    #[arg(long)]
    store_port: Option<u16>,

    /// End monitoring as soon as every token has finished
    #[arg(long)]
    stop_on_completion: bool,
}

impl RaceArgs {
    fn into_config(self) -> Result<RaceConfig> {
        let mut config = match &self.config {
            Some(path) => RaceConfig::from_yaml_file(path)?,
            None => RaceConfig::default(),
        };
        if let Some(v) = self.tracks {
            config.tracks_file = v;
        }
        if let Some(v) = self.results {
            config.results_file = v;
        }
        if let Some(v) = self.tokens_per_track {
            config.tokens_per_track = v;
        }
        if let Some(v) = self.max_laps {
            config.max_laps = v;
        }
        if let Some(v) = self.monitor_secs {
            config.monitor.window_secs = v;
        }
        if let Some(v) = self.store_host {
            config.store.host = v;
        }
        if let Some(v) = self.store_port {
            config.store.port = v;
        }
        config.monitor.stop_on_completion |= self.stop_on_completion;

        if config.tokens_per_track == 0 {
            bail!("tokens per track must be at least 1");
        }
        Ok(config)
    }
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    cancel
}

fn summarize(report: &RaceReport) {
    info!(
        finished = report.finished,
        expected = report.expected,
        flagged = report.flagged().count(),
        "race over"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { race } => {
            let config = race.into_config()?;
            let deployer = DockerDeployer::new(config.docker.clone(), config.store.clone());

            deployer.start_store().await.context("Failed to start store")?;
            let url = config.store.url();
            let store = RedisRaceStore::connect_with_retry(
                &url,
                20,
                Backoff::new(Duration::from_millis(250), Duration::from_secs(2)),
            )
            .await
            .with_context(|| format!("Failed to connect to store at {}", url))?;

            let cancel = shutdown_on_ctrl_c();
            let mut coordinator = RaceCoordinator::new(config, Arc::new(store), deployer);
            let report = coordinator.run(&cancel).await.context("Race aborted")?;
            summarize(&report);
        }

        Commands::Local { race, fast } => {
            let mut config = race.into_config()?;
            if fast {
                config.worker = WorkerTuning::fast();
            }
            info!("Running race in local memory mode");

            let store: Arc<dyn RaceStore> = Arc::new(MemoryRaceStore::new());
            let deployer = LocalDeployer::new(store.clone());
            let cancel = shutdown_on_ctrl_c();
            let mut coordinator = RaceCoordinator::new(config, store, deployer);
            let report = coordinator.run(&cancel).await.context("Race aborted")?;
            summarize(&report);
        }

        Commands::Generate { tracks, length, output, caesar, bottleneck } => {
            let definition = match (caesar, bottleneck) {
                (Some(c), Some(b)) => generate_with_contention(tracks, length, c, b)?,
                _ => generate_circular(tracks, length)?,
            };
            definition
                .write_json(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!(tracks, length, file = %output.display(), "track definition written");
        }
    }

    Ok(())
}
