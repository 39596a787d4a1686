mod cli;
mod config;

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_proxy::Proxy;

use crate::cli::Cli;
use crate::config::Config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of token characters shown in logs.
const TOKEN_VISIBLE_CHARS: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let (mut cfg, config_path) = config::load(cli.config.as_deref())?;
    cfg.apply_overrides(&cli);

    // 3. Init tracing-subscriber with JSON format.
    init_tracing(&cfg)?;

    match &config_path {
        Some(path) => info!(config_file = %path.display(), "configuration loaded"),
        None => info!("no config file found; using defaults"),
    }

    info!(
        version = VERSION,
        host = cfg.bind_host(),
        port = cfg.server.port,
        gateway = %cfg.gateway.url,
        token = %mask_token(&cfg.gateway.token),
        gateway_timeout_secs = cfg.gateway.timeout,
        handshake_timeout_secs = cfg.gateway.handshake_timeout,
        client_id = %cfg.client.id,
        client_version = %cfg.client.version,
        client_platform = %cfg.client.platform,
        client_mode = %cfg.client.mode,
        session_key = %cfg.chat.session_key,
        thinking = %cfg.chat.thinking,
        deliver = cfg.chat.deliver,
        "clawchat starting"
    );

    if cfg.security.enable_tls {
        warn!("enableTLS is set but TLS termination is not supported; serving plain HTTP");
    }

    // 4. Build the front door. The embedded UI must be readable.
    let proxy = Proxy::new(cfg.proxy_config(VERSION)).context("failed to load embedded web UI")?;

    // 5. Bind and serve until ctrl-c / SIGTERM.
    let listener = TcpListener::bind((cfg.bind_host(), cfg.server.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", cfg.bind_host(), cfg.server.port))?;

    proxy
        .serve(listener, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("clawchat shutting down");
    Ok(())
}

/// Install the global subscriber, writing to the configured log file if any.
fn init_tracing(cfg: &Config) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log.level));

    let builder = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    match cfg.log_file() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }

    Ok(())
}

/// Show only the first few characters of a secret.
fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(TOKEN_VISIBLE_CHARS).collect();
    format!("{visible}***")
}

/// Resolves on SIGINT (ctrl-c) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    warn!(%err, "failed to register SIGTERM handler");
                    ctrl_c.await;
                    info!("received SIGINT (ctrl-c)");
                    return;
                }
            };

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (ctrl-c)");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received SIGINT (ctrl-c)");
    }
}
