//! Environment connectivity signal for the headless daemon.
//!
//! There is no OS push notification here, so a periodic reachability check against the
//! API stands in for it and feeds `ConnectivityMonitor::set_environment_online`.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use pharmapos_core::connectivity::ConnectivityMonitor;
use pharmapos_remote::RemoteApiClient;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Check reachability once and report it to the monitor. Returns whether the API answered.
pub async fn probe_once(monitor: &ConnectivityMonitor, remote: &RemoteApiClient) -> bool {
    let reachable = match remote.ping(PROBE_TIMEOUT).await {
        Ok(_) => true,
        Err(err) => {
            tracing::debug!("Environment probe failed: {}", err);
            false
        }
    };
    if reachable != monitor.environment_online() {
        tracing::info!(
            "Network {}",
            if reachable { "reachable" } else { "unreachable" }
        );
    }
    monitor.set_environment_online(reachable);
    reachable
}

pub fn spawn_environment_probe(
    monitor: ConnectivityMonitor,
    remote: Arc<RemoteApiClient>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            probe_once(&monitor, &remote).await;
        }
    })
}
