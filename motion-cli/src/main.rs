//! motion-train — drives training of the motion stream CNN.
//!
//! Configuration defaults are compiled in; pass `--config` to override any
//! subset from a TOML file. The run resolves its experiment identifier,
//! pulls the latest snapshot for it from the store (continuing from that
//! checkpoint) or starts from scratch, then hands off to the fit loop.

use clap::Parser;
use motion_ml::config::MotionConfig;
use motion_ml::loader::SyntheticLoaderFactory;
use motion_ml::model::CustomObjects;
use motion_ml::snapshot::{DirStore, DriveManager};
use motion_ml::training::{FitOptions, SessionSource, Trainer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Train the motion stream of the action recognition network.
#[derive(Parser, Debug)]
#[command(name = "motion-train", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (compiled-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => MotionConfig::load(path)?,
        None => MotionConfig::default(),
    };
    config.validate()?;

    // console plus the append-only text log, kept for the life of the process
    let file_appender = tracing_appender::rolling::never(".", &config.log_file);
    let (log_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_writer)
                .with_ansi(false)
                .with_target(false),
        )
        .init();

    let experiment_id = config.experiment_identifier();
    tracing::info!(%experiment_id, "experiment");
    tracing::info!(workers = config.workers, "Number of workers");

    let store = Arc::new(DirStore::new(PathBuf::from(&config.snapshot_dir)));
    let drive = DriveManager::new(
        experiment_id,
        store,
        PathBuf::from(&config.weights_file),
        PathBuf::from(&config.preds_file),
    );

    let factory = SyntheticLoaderFactory::from_config(&config);
    let objects = CustomObjects::standard();
    let source = SessionSource::detect(&drive).await?;
    let mut session = source.resolve(&config, &factory, drive.weights_path(), &objects)?;
    let mut callbacks = session.standard_callbacks(&config)?;

    let trainer = Trainer::new(
        drive,
        FitOptions {
            epochs: config.epochs,
            workers: config.workers,
        },
    );
    let metrics = trainer.fit(&mut session, &mut callbacks).await?;
    tracing::info!(
        epochs = metrics.epochs_completed,
        best = session.best_accuracy,
        elapsed_secs = metrics.total_training_time_secs,
        "training finished"
    );
    Ok(())
}
