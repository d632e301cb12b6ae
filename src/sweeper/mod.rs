//! Expiration Sweeper
//!
//! Periodic control loop: scan the store for expired workspaces, ask the
//! stop coordinator to stop each one, and drop the record once the stop
//! is confirmed. A failed or timed-out stop leaves the record in place so
//! the next sweep retries it.

mod coordinator;
mod in_flight;

pub use coordinator::{CommandStopCoordinator, LogOnlyStopCoordinator, StopCoordinator};
pub use in_flight::{InFlight, InFlightGuard};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{ConfigError, StopError, StoreError};
use crate::metrics::SweepMetrics;
use crate::storage::{ExpirationStore, ReapOutcome};

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between scans
    pub interval: Duration,
    /// Upper bound on a single stop request
    pub stop_timeout: Duration,
    /// Stop requests allowed to run at once
    pub max_concurrent_stops: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(60),
            max_concurrent_stops: 16,
        }
    }
}

impl SweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn with_max_concurrent_stops(mut self, n: usize) -> Self {
        self.max_concurrent_stops = n;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_duration("sweep interval", self.interval)?;
        ConfigError::check_duration("stop timeout", self.stop_timeout)?;
        if self.max_concurrent_stops == 0 {
            return Err(ConfigError::Zero("max concurrent stops"));
        }
        Ok(())
    }
}

/// Where the sweeper currently is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepState {
    #[default]
    Idle,
    Scanning,
    /// Stop requests outstanding
    Stopping(usize),
}

/// Outcome of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Timestamp the scan compared deadlines against
    pub threshold: u64,
    /// Records found at or past their deadline
    pub expired: usize,
    /// Stop requests started by this sweep
    pub dispatched: usize,
    /// Expired workspaces already being stopped by an earlier sweep
    pub skipped_in_flight: usize,
}

/// Scan-and-stop engine
#[derive(Debug, Clone)]
pub struct Sweeper {
    store: Arc<dyn ExpirationStore>,
    coordinator: Arc<dyn StopCoordinator>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
    in_flight: InFlight,
    limiter: Arc<Semaphore>,
    metrics: Arc<SweepMetrics>,
    state: Arc<watch::Sender<SweepState>>,
}

impl Sweeper {
    /// Create a sweeper; rejects non-positive interval or stop timeout
    pub fn new(
        store: Arc<dyn ExpirationStore>,
        coordinator: Arc<dyn StopCoordinator>,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(SweepState::Idle);
        Ok(Self {
            store,
            coordinator,
            clock,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_stops)),
            config,
            in_flight: InFlight::new(),
            metrics: Arc::new(SweepMetrics::new()),
            state: Arc::new(state),
        })
    }

    pub fn metrics(&self) -> &Arc<SweepMetrics> {
        &self.metrics
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    pub fn state(&self) -> watch::Receiver<SweepState> {
        self.state.subscribe()
    }

    /// Run one full cycle and wait for every stop it started
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let mut tasks = JoinSet::new();
        let result = self.dispatch(&mut tasks).await;
        self.publish(&tasks);

        while let Some(res) = tasks.join_next().await {
            log_join(res);
            self.publish(&tasks);
        }
        result
    }

    /// Scan and hand every newly expired workspace to a stop task
    async fn dispatch(&self, tasks: &mut JoinSet<()>) -> Result<SweepReport, StoreError> {
        self.metrics.record_sweep();
        self.state.send_replace(SweepState::Scanning);

        let threshold = self.clock.now_ms();
        let expired = match self.store.find_expired(threshold).await {
            Ok(ids) => ids,
            Err(e) => {
                self.metrics.record_scan_failure();
                return Err(e);
            }
        };

        let mut report = SweepReport {
            threshold,
            expired: expired.len(),
            dispatched: 0,
            skipped_in_flight: 0,
        };

        for workspace_id in expired {
            match self.in_flight.try_acquire(&workspace_id) {
                Some(guard) => {
                    let this = self.clone();
                    tasks.spawn(this.stop_one(guard, threshold));
                    report.dispatched += 1;
                }
                None => {
                    debug!(workspace_id = %workspace_id, "Stop already in flight");
                    report.skipped_in_flight += 1;
                }
            }
        }

        self.metrics
            .record_skipped_in_flight(report.skipped_in_flight as u64);
        if report.expired > 0 {
            info!(
                expired = report.expired,
                dispatched = report.dispatched,
                skipped = report.skipped_in_flight,
                "Expired workspaces found"
            );
        }
        Ok(report)
    }

    /// One stop attempt. The guard keeps the id claimed until it returns.
    async fn stop_one(self, guard: InFlightGuard, threshold: u64) {
        let workspace_id = guard.workspace_id().to_owned();

        let _permit = match self.limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        self.metrics.record_stop_requested();
        let started = Instant::now();
        let outcome = match timeout(
            self.config.stop_timeout,
            self.coordinator.request_stop(&workspace_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StopError::TimedOut(self.config.stop_timeout)),
        };

        match outcome {
            Ok(()) => {
                self.metrics.record_stop_succeeded(started.elapsed());
                // Conditional so a ping that landed after the scan keeps
                // the workspace tracked
                match self.store.remove_expired(&workspace_id, threshold).await {
                    Ok(ReapOutcome::Removed) => {
                        self.metrics.record_reaped();
                        info!(workspace_id = %workspace_id, "Expired workspace stopped");
                    }
                    Ok(ReapOutcome::Rearmed(expires_at)) => {
                        self.metrics.record_rearmed();
                        info!(
                            workspace_id = %workspace_id,
                            expires_at,
                            "Workspace stopped after new activity, keeping its expiration"
                        );
                    }
                    Ok(ReapOutcome::Missing) => {
                        self.metrics.record_already_removed();
                        debug!(
                            workspace_id = %workspace_id,
                            "Expiration already removed by a stop event"
                        );
                    }
                    Err(e) => warn!(
                        workspace_id = %workspace_id,
                        error = %e,
                        "Failed to remove expiration after stop"
                    ),
                }
            }
            Err(e @ StopError::TimedOut(_)) => {
                self.metrics.record_stop_timed_out();
                warn!(workspace_id = %workspace_id, error = %e, "Stop failed, will retry");
            }
            Err(e) => {
                self.metrics.record_stop_failed(started.elapsed());
                warn!(workspace_id = %workspace_id, error = %e, "Stop failed, will retry");
            }
        }

        drop(guard);
    }

    fn publish(&self, tasks: &JoinSet<()>) {
        let state = if tasks.is_empty() {
            SweepState::Idle
        } else {
            SweepState::Stopping(tasks.len())
        };
        self.state.send_replace(state);
    }

    /// Loop until cancelled, then let outstanding stops finish
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks: JoinSet<()> = JoinSet::new();

        info!("Expiration sweeper started, interval: {:?}", self.config.interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join(res);
                    self.publish(&tasks);
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch(&mut tasks).await {
                        warn!(error = %e, "Sweep aborted, retrying next tick");
                    }
                    self.publish(&tasks);
                }
            }
        }

        info!(outstanding = tasks.len(), "Expiration sweeper stopping");
        while let Some(res) = tasks.join_next().await {
            log_join(res);
            self.publish(&tasks);
        }
        self.state.send_replace(SweepState::Idle);
        info!("{}", self.metrics.summary());
    }

    /// Spawn the loop as a background task
    pub fn spawn(self) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let state = self.state();
        let metrics = self.metrics.clone();
        let join = tokio::spawn(self.run(cancel.clone()));
        SweeperHandle {
            cancel,
            join,
            state,
            metrics,
        }
    }
}

fn log_join(res: Result<(), JoinError>) {
    if let Err(e) = res {
        error!(error = %e, "Stop task panicked");
    }
}

/// Control handle for a spawned sweeper
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    state: watch::Receiver<SweepState>,
    metrics: Arc<SweepMetrics>,
}

impl SweeperHandle {
    pub fn state(&self) -> watch::Receiver<SweepState> {
        self.state.clone()
    }

    pub fn metrics(&self) -> &Arc<SweepMetrics> {
        &self.metrics
    }

    /// Token that stops the loop when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop scanning, wait for outstanding stops, then join the loop
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel.cancel();
        self.join.await
    }
}
