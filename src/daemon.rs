//! Daemon orchestration: configuration wait loop, subsystem wiring, dispatch
//! worker, heartbeat, and shutdown ordering.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::capture::CaptureEngine;
use crate::config::{BrokerConfig, ConfigProvider};
use crate::queue::{EventQueue, QUEUE_CAPACITY};
use crate::relay::RelayClient;

/// Delay between attempts to load the broker configuration at startup.
const CONFIG_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Liveness heartbeat interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Capture statistics log interval.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Run the daemon until the cancellation token fires.
pub async fn run(provider: impl ConfigProvider, cancel: CancellationToken) -> anyhow::Result<()> {
    tracing::info!("callwatch daemon starting");

    let Some(broker_config) = wait_for_broker_config(&provider, &cancel).await else {
        tracing::info!("cancelled before configuration was loaded");
        return Ok(());
    };

    let relay = Arc::new(RelayClient::connect(broker_config, cancel.child_token()));

    let queue = EventQueue::new(QUEUE_CAPACITY);
    let dispatch = tokio::spawn(dispatch_loop(queue.clone(), relay.clone()));

    let mut engine = CaptureEngine::new(provider.capture_config(), queue.clone());
    engine
        .start()
        .context("failed to start packet capture")?;
    let stats = engine.stats();

    tracing::info!("daemon started, monitoring SIP traffic");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = heartbeat.tick() => {
                tracing::info!(
                    queued = queue.len(),
                    queue_dropped = queue.dropped(),
                    published = relay.published_count(),
                    publish_dropped = relay.dropped_count(),
                    "heartbeat"
                );
            }
            _ = stats_tick.tick() => {
                let last = match stats.seconds_since_last_frame() {
                    Some(secs) => format!("{}s ago", secs),
                    None => "never".to_string(),
                };
                tracing::debug!(
                    frames = stats.frames_total(),
                    sip_frames = stats.sip_frames(),
                    last_frame = %last,
                    "capture stats"
                );
            }
        }
    }

    tracing::info!("daemon stopping");
    engine.stop();
    queue.close();
    dispatch.await.context("dispatch worker panicked")?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Retry the configuration provider until a broker configuration exists.
///
/// "Not provisioned yet" and "store unreadable" are both retried, but logged
/// differently: the former needs an operator, the latter should pass.
async fn wait_for_broker_config(
    provider: &impl ConfigProvider,
    cancel: &CancellationToken,
) -> Option<BrokerConfig> {
    loop {
        match provider.broker_config().await {
            Ok(Some(config)) => {
                tracing::info!("broker configuration loaded");
                return Some(config);
            }
            Ok(None) => {
                tracing::warn!(
                    "no broker configuration found; waiting for it to be provisioned \
                     via the web interface"
                );
            }
            Err(e) => {
                tracing::error!(
                    "error loading broker configuration: {e}; retrying in {}s",
                    CONFIG_RETRY_DELAY.as_secs()
                );
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(CONFIG_RETRY_DELAY) => {}
        }
    }
}

/// Drain the queue one event at a time, in arrival order, awaiting each
/// publish before taking the next. Exits when the queue closes.
async fn dispatch_loop(queue: EventQueue, relay: Arc<RelayClient>) {
    while let Some(event) = queue.recv().await {
        relay.publish(&event).await;
    }
    tracing::debug!("dispatch worker exited");
}
