mod bootstrap;
mod health;
mod ingress;
mod sweeper;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use knowbot_core::config::{AppConfig, ConfigOverrides, LoadOptions, SlackPlatform};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Routes Slack questions to colleagues who can answer them.
#[derive(Debug, Parser)]
#[command(name = "knowbot", version, about)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, env = "KNOWBOT_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen port.
    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    database_url: Option<String>,

    /// `slack_app` or `slack_ci`.
    #[arg(long)]
    platform: Option<SlackPlatform>,
}

impl Args {
    fn into_load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides {
                database_url: self.database_url,
                log_level: self.log_level,
                slack_platform: self.platform,
                server_port: self.port,
                ..ConfigOverrides::default()
            },
        }
    }
}

fn init_logging(config: &AppConfig) {
    use knowbot_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Args::parse()).await
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.into_load_options())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = sweeper::spawn(
        app.register.clone(),
        app.config.register.sweep_interval(),
        shutdown_rx.clone(),
    );

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {address}"))?;
    let http_router = app.http_router()?;
    let mut http_shutdown = shutdown_rx.clone();
    let http = tokio::spawn(async move {
        axum::serve(listener, http_router)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.wait_for(|stopping| *stopping).await;
            })
            .await
    });

    let socket = app.socket_runner.map(|runner| {
        tokio::spawn(async move {
            if let Err(error) = runner.start().await {
                tracing::error!(
                    event_name = "system.server.socket_failed",
                    error = %error,
                    "socket mode runner stopped with an error"
                );
            }
        })
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        address = %address,
        socket_mode = socket.is_some(),
        "knowbot started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        open_conversations = app.hub.open_count(),
        pending_answers = app.register.len().await,
        "knowbot stopping"
    );

    shutdown_tx.send_replace(true);
    if let Some(socket) = socket {
        socket.abort();
    }

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, http).await {
        Ok(Ok(result)) => result.context("HTTP server failed")?,
        Ok(Err(join_error)) => return Err(join_error).context("HTTP server task panicked"),
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            grace_secs = grace.as_secs(),
            "HTTP server did not drain before the grace period ended"
        ),
    }
    let _ = sweeper.await;
    app.db_pool.close().await;

    Ok(())
}
