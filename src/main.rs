use anyhow::Context;
use beartrap::config::{Cli, Config};
use beartrap::dashboard;
use beartrap::geo::GeoResolver;
use beartrap::logging::{default_log_format, init_logging};
use beartrap::monitor::Monitor;
use beartrap::probe::Prober;
use beartrap::tail::LogTailer;
use clap::Parser;
use dotenv::dotenv;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Raw records waiting for normalization.
const RECORD_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_format.unwrap_or_else(default_log_format));
    let config = Config::from(&cli);

    let monitoring = Arc::new(AtomicBool::new(true));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    })
    .context("installing ctrl-c handler")?;

    let (tailer, tailer_state) =
        LogTailer::new(&config.eve_log, config.tail.clone(), Arc::clone(&monitoring));
    let geo = GeoResolver::from_config(&config.geo);
    let monitor = Arc::new(Monitor::new(&config, geo, Arc::clone(&monitoring), tailer_state));
    let prober = Prober::new(Arc::clone(&monitor), config.probe.clone())
        .context("building probe client")?;

    info!(eve_log = %config.eve_log.display(), "starting monitor");

    let (record_tx, record_rx) = mpsc::channel(RECORD_QUEUE);
    let tail_task = tokio::spawn(tailer.run(record_tx, shutdown_rx.clone()));
    let pipeline_task = tokio::spawn(Arc::clone(&monitor).process_events(record_rx));
    let probe_task = tokio::spawn(prober.run(shutdown_rx.clone()));

    let mut shutdown = shutdown_rx;
    dashboard::serve(config.listen, Arc::clone(&monitor), async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    })
    .await?;

    for (name, task) in [("tailer", tail_task), ("prober", probe_task)] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "task ended abnormally");
        }
    }
    // The tailer owned the only record sender, so the pipeline drains and exits.
    if let Err(e) = pipeline_task.await {
        warn!(error = %e, "event pipeline ended abnormally");
    }

    info!("monitor stopped");
    Ok(())
}
