use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use netpulse::aggregator::StatusAggregator;
use netpulse::config::Config;
use netpulse::pool::WorkerPool;
use netpulse::server::{self, AppState};
use netpulse::target::parse_targets;
use netpulse::worker::ProbeKit;
use netpulse::{logging, web};

/// netpulse: keeps an always-current reachability, port and UDP service view of your network targets.
#[derive(Debug, Clone, Parser)]
#[command(name = "netpulse", version, long_about = None)]
struct Cli {
    /// Config file (created with defaults when missing). Defaults to the platform config dir, e.g. ~/.config/netpulse/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target to monitor, e.g. `printer.lan`, `10.0.0.5:80,443` or `[fe80::1]:80`.
    /// Repeatable; replaces the targets from the config file.
    #[arg(long = "target", value_name = "TARGET")]
    targets: Vec<String>,

    /// Serve the JSON status API.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the status API.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let config = Config::load_or_create(cli.config.as_deref()).context("loading configuration")?;
    let settings = config.probe_settings().context("invalid configuration")?;
    let services: Vec<&str> = settings.services.iter().map(|k| k.display_name()).collect();
    info!(?services, interval = ?settings.ping_interval, "probe settings loaded");

    let lines = if cli.targets.is_empty() {
        &config.targets
    } else {
        &cli.targets
    };
    let parsed = parse_targets(lines, &settings.default_ports);
    for (line, e) in &parsed.rejected {
        warn!(line, error = %e, "rejected target");
    }
    if parsed.targets.is_empty() {
        warn!("no targets to monitor; add some to the config file or pass --target");
    }

    let mut aggregator = StatusAggregator::new((parsed.targets.len() * 4).max(64));
    let records = aggregator.records();
    let default_ports = settings.default_ports.clone();
    let kit = ProbeKit::from_settings(&settings);
    let pool = Arc::new(Mutex::new(WorkerPool::new(settings, kit, &aggregator)));
    let diff = pool.lock().await.start(parsed.targets).await;
    info!(targets = diff.added.len(), "monitoring started");

    if cli.serve_ui {
        let state = AppState::new(Arc::clone(&pool), records.clone(), default_ports);
        let bind = cli.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, state).await {
                error!(error = %e, "status API server failed");
            }
        });
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut previous = records.snapshot().await;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            updated = aggregator.merge_next() => {
                let current = records.snapshot().await;
                for id in &updated {
                    let Some(rec) = current.get(id) else { continue };
                    if previous.get(id).map(|p| p.status) != Some(rec.status) {
                        info!(
                            target_id = %id,
                            status = %rec.status,
                            latency = %rec.latency_label(),
                            open_ports = ?rec.open_ports(),
                            "status changed"
                        );
                    }
                }
                for id in web::web_port_transitions(&previous, &current) {
                    if let Some(url) = current.get(&id).and_then(|rec| web::web_ui_url(&id, rec)) {
                        info!(target_id = %id, %url, "web interface available");
                    }
                }
                previous = current;
            }
        }
    }

    info!("shutting down");
    pool.lock().await.stop().await;
    Ok(())
}
