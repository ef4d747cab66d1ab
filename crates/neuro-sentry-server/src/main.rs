//! Neuro Sentry server binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use neuro_sentry_server::ServerConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "neuro-sentry-server", about = "Presage telemetry ingestion and live triage server")]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Live rolling window in seconds
    #[arg(long)]
    window_seconds: Option<f64>,

    /// Tick interval in milliseconds (100-5000)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Age in milliseconds after which live data is simulated
    #[arg(long)]
    stale_after_ms: Option<u64>,

    /// Maximum packets recorded per session
    #[arg(long)]
    session_max_packets: Option<usize>,

    /// External classifier endpoint
    #[arg(long, env = "NEURO_SENTRY_CLASSIFIER_URL")]
    classifier_url: Option<String>,

    /// Classifier call timeout in milliseconds
    #[arg(long)]
    classifier_timeout_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServerConfig::from_json(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(v) = self.bind {
            cfg.bind_addr = v;
        }
        if let Some(v) = self.window_seconds {
            cfg.window_seconds = v;
        }
        if let Some(v) = self.tick_ms {
            cfg.tick_ms = v;
        }
        if let Some(v) = self.stale_after_ms {
            cfg.stale_after_ms = v;
        }
        if let Some(v) = self.session_max_packets {
            cfg.session_max_packets = Some(v);
        }
        if let Some(v) = self.classifier_url {
            cfg.classifier_url = Some(v);
        }
        if let Some(v) = self.classifier_timeout_ms {
            cfg.classifier_timeout_ms = v;
        }
        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let config = Args::parse().into_config()?;
    info!(
        bind = %config.bind_addr,
        window_seconds = config.window_seconds,
        tick_ms = config.tick_ms,
        stale_after_ms = config.stale_after_ms,
        "starting neuro-sentry-server"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        signal.cancel();
    });

    neuro_sentry_server::run(config, shutdown).await?;
    Ok(())
}
