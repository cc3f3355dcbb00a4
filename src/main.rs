use color_eyre::{eyre::eyre, Result};
use dsu_bridge::config::BridgeConfig;
use dsu_bridge::controller::ControllerHandle;
use dsu_bridge::server::DsuServer;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = BridgeConfig::default_path();
    let config = BridgeConfig::load_or_create(&config_path).await?;
    setup_logging_env(&config.log_level);
    info!("Loaded configuration from {}", config_path.display());

    let (state_tx, state_rx) = mpsc::channel(config.controller.channel_capacity.max(1));

    // The server keeps answering port listings without a pad, it just never reports
    let controller_handle = match ControllerHandle::spawn(Some(config.controller.clone()), state_tx)
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Controller unavailable, continuing without pad input: {}", e);
            None
        }
    };

    let cancel = CancellationToken::new();
    let server = DsuServer::bind(&config.server, cancel.clone())
        .await
        .map_err(|e| eyre!("Failed to start DSU server: {}", e))?;

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
        }
        shutdown.cancel();
    });

    server
        .run(state_rx)
        .await
        .map_err(|e| eyre!("DSU server stopped: {}", e))?;

    if let Some(handle) = &controller_handle {
        if handle.is_running() {
            info!("Collector thread exits with the process");
        }
    }
    info!("Bye");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

fn setup_logging_env(log_level: &str) {
    let level = Level::from_str(log_level).unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
    if !log_level.eq_ignore_ascii_case(level.as_str()) {
        warn!("Unknown log level {:?}, using {}", log_level, level);
    }
}
