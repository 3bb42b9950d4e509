//! Outbox drain driver.
//!
//! `Idle -> Draining` on reconnect or an explicit sync, `Draining -> Idle` once the
//! outbox is empty, `Draining -> Backoff` on the first failed replay. Drains are
//! strictly FIFO and never skip a failed operation.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::policy::SyncPolicy;
use crate::connectivity::ConnectivityMonitor;
use crate::errors::{Error, Result};
use crate::outbox::OutboxRepositoryTrait;
use crate::remote::OperationTransportTrait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    Draining,
    Backoff,
}

/// What started a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Reconnected,
    Manual,
    LocalMutation,
    BackoffElapsed,
}

/// Snapshot published to status observers (pending badge, sync indicator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: DriverState,
    pub pending_count: usize,
    pub syncing: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub queue_pressure: bool,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: DriverState::Idle,
            pending_count: 0,
            syncing: false,
            consecutive_failures: 0,
            last_error: None,
            next_retry_at: None,
            queue_pressure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DrainOutcome {
    /// Nothing was queued; no remote call was made.
    Empty,
    Drained,
    Halted { operation_id: i64, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub trigger: SyncTrigger,
    pub replayed: usize,
    pub remaining: usize,
    pub outcome: DrainOutcome,
}

#[derive(Debug)]
struct DriverRuntime {
    state: DriverState,
    consecutive_failures: u32,
    last_error: Option<String>,
    retry_deadline: Option<Instant>,
    next_retry_at: Option<DateTime<Utc>>,
    queue_pressure: bool,
}

impl Default for DriverRuntime {
    fn default() -> Self {
        Self {
            state: DriverState::Idle,
            consecutive_failures: 0,
            last_error: None,
            retry_deadline: None,
            next_retry_at: None,
            queue_pressure: false,
        }
    }
}

pub struct SyncDriver {
    outbox: Arc<dyn OutboxRepositoryTrait>,
    transport: Arc<dyn OperationTransportTrait>,
    monitor: ConnectivityMonitor,
    policy: SyncPolicy,
    drain_mutex: AsyncMutex<()>,
    runtime: Mutex<DriverRuntime>,
    status_tx: watch::Sender<SyncStatus>,
    wake: Notify,
    background_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SyncDriver {
    pub fn new(
        outbox: Arc<dyn OutboxRepositoryTrait>,
        transport: Arc<dyn OperationTransportTrait>,
        monitor: ConnectivityMonitor,
        policy: SyncPolicy,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Self {
            outbox,
            transport,
            monitor,
            policy,
            drain_mutex: AsyncMutex::new(()),
            runtime: Mutex::new(DriverRuntime::default()),
            status_tx,
            wake: Notify::new(),
            background_task: AsyncMutex::new(None),
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn state(&self) -> DriverState {
        self.runtime().state
    }

    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Live count of queued operations, straight from the outbox.
    pub async fn pending_count(&self) -> Result<usize> {
        self.outbox.count().await
    }

    /// A local write was queued: refresh the badge and let the background loop decide
    /// whether to drain now or wait for the next probe.
    pub async fn notify_enqueued(&self) {
        self.publish().await;
        self.wake.notify_one();
    }

    /// Replay queued operations oldest first until the outbox is empty or one fails.
    ///
    /// Only one drain runs at a time; concurrent callers wait for the running drain and
    /// then drain whatever is left.
    pub async fn drain(&self, trigger: SyncTrigger) -> Result<DrainReport> {
        let _drain_guard = self.drain_mutex.lock().await;

        let pending = match self.outbox.count().await {
            Ok(pending) => pending,
            Err(err) => {
                self.enter_backoff(err.to_string()).await;
                return Err(err);
            }
        };
        if pending == 0 {
            debug!("[SyncDriver] {:?}: outbox empty, nothing to replay", trigger);
            self.finish_idle().await;
            return Ok(DrainReport {
                trigger,
                replayed: 0,
                remaining: 0,
                outcome: DrainOutcome::Empty,
            });
        }

        info!(
            "[SyncDriver] {:?}: draining {} queued operation(s)",
            trigger, pending
        );
        self.runtime().state = DriverState::Draining;
        self.publish().await;

        match self.replay_queue().await {
            Ok((replayed, None)) => {
                info!("[SyncDriver] Drain complete, {} replayed", replayed);
                self.finish_idle().await;
                Ok(DrainReport {
                    trigger,
                    replayed,
                    remaining: 0,
                    outcome: DrainOutcome::Drained,
                })
            }
            Ok((replayed, Some((operation_id, error)))) => {
                let message = Error::OperationReplayFailed {
                    id: operation_id,
                    message: error,
                }
                .to_string();
                warn!("[SyncDriver] {}", message);
                self.enter_backoff(message.clone()).await;
                let remaining = self.status().pending_count;
                Ok(DrainReport {
                    trigger,
                    replayed,
                    remaining,
                    outcome: DrainOutcome::Halted {
                        operation_id,
                        error: message,
                    },
                })
            }
            Err(err) => {
                warn!("[SyncDriver] Drain aborted: {}", err);
                self.enter_backoff(err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Returns how many operations were replayed and, if the drain halted, the failing
    /// operation with its error.
    async fn replay_queue(&self) -> Result<(usize, Option<(i64, String)>)> {
        let mut replayed = 0;
        while let Some(op) = self.outbox.head().await? {
            debug!(
                "[SyncDriver] Replaying #{} {} {} (attempt {})",
                op.id,
                op.request.method(),
                op.request.url,
                op.retry_count + 1
            );
            match self
                .transport
                .send(&op.request, Some(&op.idempotency_key))
                .await
            {
                Ok(()) => {
                    self.monitor.record_request_success();
                    if let Err(err) = self.outbox.remove_by_id(op.id).await {
                        // Acknowledged remotely but still queued; the replay will carry the
                        // same idempotency key.
                        return Ok((replayed, Some((op.id, err.to_string()))));
                    }
                    replayed += 1;
                    self.publish().await;
                }
                Err(err) => {
                    if err.is_connectivity_failure() {
                        self.monitor.record_request_failure();
                    } else {
                        self.monitor.record_request_success();
                    }
                    let message = err.to_string();
                    if let Err(record_err) =
                        self.outbox.record_failure(op.id, message.clone()).await
                    {
                        warn!(
                            "[SyncDriver] Could not record failure of #{}: {}",
                            op.id, record_err
                        );
                    }
                    return Ok((replayed, Some((op.id, message))));
                }
            }
        }
        Ok((replayed, None))
    }

    async fn finish_idle(&self) {
        {
            let mut runtime = self.runtime();
            runtime.state = DriverState::Idle;
            runtime.consecutive_failures = 0;
            runtime.last_error = None;
            runtime.retry_deadline = None;
            runtime.next_retry_at = None;
        }
        self.publish().await;
    }

    async fn enter_backoff(&self, message: String) {
        let delay = {
            let mut runtime = self.runtime();
            runtime.consecutive_failures = runtime.consecutive_failures.saturating_add(1);
            let delay = self.policy.jittered_delay(runtime.consecutive_failures);
            Self::arm_retry(&mut runtime, delay);
            runtime.last_error = Some(message);
            delay
        };
        info!("[SyncDriver] Backing off for {:?}", delay);
        self.publish().await;
        self.wake.notify_one();
    }

    /// Arm a probe without counting a new failure. Used when work is queued while
    /// requests are failing.
    async fn schedule_probe(&self) {
        let delay = {
            let mut runtime = self.runtime();
            let failures = runtime.consecutive_failures.max(1);
            let delay = self.policy.jittered_delay(failures);
            Self::arm_retry(&mut runtime, delay);
            delay
        };
        debug!("[SyncDriver] Requests degraded; probing in {:?}", delay);
        self.publish().await;
    }

    fn arm_retry(runtime: &mut DriverRuntime, delay: Duration) {
        runtime.state = DriverState::Backoff;
        runtime.retry_deadline = Some(Instant::now() + delay);
        runtime.next_retry_at = chrono::Duration::from_std(delay)
            .ok()
            .map(|delay| Utc::now() + delay);
    }

    fn runtime(&self) -> MutexGuard<'_, DriverRuntime> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Recount the outbox and push a fresh status to observers.
    async fn publish(&self) {
        let counted = self.outbox.count().await;
        let status = {
            let mut runtime = self.runtime();
            let pending_count = match counted {
                Ok(count) => count,
                Err(err) => {
                    debug!("[SyncDriver] Pending count unavailable: {}", err);
                    self.status_tx.borrow().pending_count
                }
            };
            let pressure = self.policy.is_under_pressure(pending_count);
            if pressure && !runtime.queue_pressure {
                warn!(
                    "[SyncDriver] {} operations waiting for the remote (threshold {})",
                    pending_count, self.policy.queue_warn_threshold
                );
            }
            runtime.queue_pressure = pressure;
            SyncStatus {
                state: runtime.state,
                pending_count,
                syncing: runtime.state == DriverState::Draining,
                consecutive_failures: runtime.consecutive_failures,
                last_error: runtime.last_error.clone(),
                next_retry_at: runtime.next_retry_at,
                queue_pressure: pressure,
            }
        };
        self.status_tx.send_replace(status);
    }

    /// Spawn the background loop. Calling it again while the loop runs is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let driver = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            driver.run_background_loop().await;
        }));
        info!("[SyncDriver] Background loop started");
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.background_task.lock().await.take() {
            handle.abort();
            info!("[SyncDriver] Background loop stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.background_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn run_background_loop(self: Arc<Self>) {
        let mut connectivity = self.monitor.watch();
        let mut was_online = connectivity.borrow_and_update().is_online();

        self.publish().await;
        if was_online {
            self.drain_logged(SyncTrigger::Startup).await;
        }

        loop {
            let deadline = {
                let runtime = self.runtime();
                match runtime.state {
                    DriverState::Backoff => runtime.retry_deadline,
                    _ => None,
                }
            };

            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = connectivity.borrow_and_update().is_online();
                    if online && !was_online {
                        self.drain_logged(SyncTrigger::Reconnected).await;
                    }
                    was_online = online;
                }
                _ = self.wake.notified() => {
                    self.on_wake().await;
                }
                _ = sleep_until_deadline(deadline) => {
                    if self.monitor.environment_online() {
                        self.drain_logged(SyncTrigger::BackoffElapsed).await;
                    } else {
                        // Offline: wait for the reconnect instead of probing.
                        let mut runtime = self.runtime();
                        runtime.retry_deadline = None;
                        runtime.next_retry_at = None;
                    }
                }
            }
        }
    }

    async fn on_wake(&self) {
        if self.state() == DriverState::Backoff {
            return;
        }
        if self.monitor.is_online() {
            self.drain_logged(SyncTrigger::LocalMutation).await;
        } else if self.monitor.environment_online() {
            match self.outbox.count().await {
                Ok(pending) if pending > 0 => self.schedule_probe().await,
                Ok(_) => {}
                Err(err) => debug!("[SyncDriver] Pending count unavailable: {}", err),
            }
        }
    }

    async fn drain_logged(&self, trigger: SyncTrigger) {
        match self.drain(trigger).await {
            Ok(report) => debug!(
                "[SyncDriver] {:?} drain: replayed={} remaining={} outcome={:?}",
                report.trigger, report.replayed, report.remaining, report.outcome
            ),
            Err(err) => warn!("[SyncDriver] {:?} drain failed: {}", trigger, err),
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
