//! callwatch - SIP call monitor daemon
//!
//! Captures SIP signaling from a network link, detects incoming call
//! invites addressed to the local PBX, and relays caller-ID events to an
//! MQTT broker. Runs unattended; configuration is provisioned externally
//! and picked up through the configuration store.

mod capture;
mod config;
mod daemon;
mod queue;
mod relay;
mod sip;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use config::{CaptureConfig, FileConfigProvider};

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("callwatch=info".parse().unwrap()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let provider = FileConfigProvider::new(config_store_path(), CaptureConfig::from_env());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    daemon::run(provider, cancel).await
}

/// Location of the shared configuration store: `/app/data` inside the
/// container, `./data` next to the binary otherwise. Overridable for
/// non-standard layouts.
fn config_store_path() -> PathBuf {
    if let Ok(path) = std::env::var("CALLWATCH_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let data_dir = if std::path::Path::new("/app/data").is_dir() {
        PathBuf::from("/app/data")
    } else {
        PathBuf::from("data")
    };
    data_dir.join("broker.json")
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
