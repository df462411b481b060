use anyhow::{Context, Result};
use clap::Parser;
use climate_agent::{cli, config, http, sink, supervisor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,climate_agent=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_tracing()?;

    let path = config::config_path(args.config);
    let config = config::AgentConfig::load(&path)
        .with_context(|| format!("could not load configuration from {}", path.display()))?;
    if args.check_config {
        tracing::info!(
            path = %path.display(),
            sources = ?config.enabled_sources(),
            "configuration ok"
        );
        return Ok(());
    }

    let http = http::build_client()?;
    let sink = Arc::new(sink::InfluxSink::new(http.clone(), &config.influx)?);
    tracing::info!(url = %sink.write_url(), "writing to influx");

    let cancel = CancellationToken::new();
    let handles = supervisor::AgentSupervisor::new(config, http, sink).start(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    cancel.cancel();
    for handle in handles {
        if let Err(err) = handle.await {
            if !err.is_cancelled() {
                tracing::warn!(error = %err, "agent task panicked");
            }
        }
    }
    Ok(())
}
