//! Custodian server binary.

use anyhow::{Context, Result};
use clap::Parser;
use custodian_core::config::AppConfig;
use custodian_server::{AppState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Custodian - storage reconciliation and safe cleanup service
#[derive(Parser, Debug)]
#[command(name = "custodiand")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CUSTODIAN_CONFIG",
        default_value = "config/custodian.toml"
    )]
    config: String,
}

fn load_config(config_path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = std::path::Path::new(config_path).exists();

    if has_config_file {
        tracing::info!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::debug!("No config file found at {}", config_path);
    }

    // CUSTODIAN_CONFIG only names the file.
    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with("CUSTODIAN_") && key != "CUSTODIAN_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: custodiand --config /path/to/custodian.toml\n  \
             2. Environment variables: CUSTODIAN_SERVER__BIND=0.0.0.0:8080 \
             CUSTODIAN_METADATA__TYPE=sqlite CUSTODIAN_METADATA__PATH=/var/lib/custodian/metadata.db custodiand\n\n\
             Set CUSTODIAN_CONFIG to specify a default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("CUSTODIAN_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Custodian v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    custodian_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Opening the store also applies the embedded schema.
    let metadata = custodian_metadata::open(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata store health check failed")?;
    tracing::info!("Metadata store initialized");

    let state = AppState::new(config.clone(), metadata);

    let recovered = state
        .tracker()
        .recover_interrupted(config.cleanup.cooldown())
        .await
        .context("failed to recover interrupted job executions")?;
    if recovered > 0 {
        tracing::warn!(count = recovered, "Recovered interrupted job executions");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
