//! Process driver for the TinyNFS storage engine (`spec.md` §4.7): loads
//! config, opens the engine, acquires the data-directory lock, runs a
//! periodic snapshot ticker, and shuts down cleanly on SIGINT/SIGTERM/
//! SIGQUIT — the same three terminal signals
//! `examples/original_source/src/tinynfsd.go`'s `StartSignal` selects
//! over, translated into async Rust.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use common::Config;
use platform::{Platform, UnixPlatform};
use storage::{BlobEngine, Lifecycle, NoopTransport};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{interval, Duration};

#[derive(Parser, Debug)]
#[command(name = "tinynfsd", about = "TinyNFS storage engine process driver")]
struct Args {
    /// Path to the key=value configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Data root directory; substituted for `{{DATA}}` in config paths.
    #[arg(long)]
    data: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "tinynfsd: fatal startup error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config, &args.data).context("loading configuration")?;
    let platform: Arc<dyn Platform> = Arc::new(UnixPlatform);

    let engine = Arc::new(
        BlobEngine::open(args.data.clone(), config.clone(), Arc::clone(&platform))
            .context("opening blob engine")?,
    );

    let lifecycle = Arc::new(
        Lifecycle::start(&args.data, Arc::clone(&engine), Arc::new(NoopTransport), platform.as_ref())
            .context("acquiring data directory lock")?,
    );

    let ticker_engine = Arc::clone(&engine);
    let ticker_interval = Duration::from_secs(config.snapshot_interval_secs.max(1));
    let ticker = tokio::spawn(async move {
        let mut tick = interval(ticker_interval);
        loop {
            tick.tick().await;
            match ticker_engine.snapshot(false) {
                Ok(Some(name)) => tracing::info!(name, "periodic snapshot written"),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "periodic snapshot failed"),
            }
        }
    });

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigquit.recv() => tracing::info!("received SIGQUIT"),
    }

    ticker.abort();
    lifecycle.shutdown();
    tracing::info!("tinynfsd: clean shutdown");
    Ok(())
}
