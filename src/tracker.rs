//! Activity Tracker
//!
//! Turns activity and stop observations into expiration writes. Holds no
//! per-workspace state; the store decides everything.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{ConfigError, StoreError, TrackError};
use crate::storage::ExpirationStore;

/// Records workspace liveness against an expiration store
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    store: Arc<dyn ExpirationStore>,
    clock: Arc<dyn Clock>,
    default_idle_timeout: Duration,
}

impl ActivityTracker {
    /// Create a tracker; the default idle timeout must be positive
    pub fn new(
        store: Arc<dyn ExpirationStore>,
        clock: Arc<dyn Clock>,
        default_idle_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        ConfigError::check_duration("default idle timeout", default_idle_timeout)?;
        Ok(Self {
            store,
            clock,
            default_idle_timeout,
        })
    }

    /// Slide the deadline to `now + idle_timeout_ms`.
    ///
    /// Zero or negative timeouts are rejected before the store is touched.
    pub async fn record_activity(
        &self,
        workspace_id: &str,
        idle_timeout_ms: i64,
    ) -> Result<u64, TrackError> {
        if idle_timeout_ms <= 0 {
            return Err(ConfigError::NonPositive {
                name: "idle timeout",
                value_ms: idle_timeout_ms,
            }
            .into());
        }

        let expires_at = self.clock.now_ms().saturating_add(idle_timeout_ms as u64);
        self.store.set_expiration(workspace_id, expires_at).await?;
        debug!(workspace_id = %workspace_id, expires_at, "Activity recorded");
        Ok(expires_at)
    }

    /// Activity with the configured default timeout
    pub async fn record_default_activity(&self, workspace_id: &str) -> Result<u64, TrackError> {
        let timeout_ms = i64::try_from(self.default_idle_timeout.as_millis()).unwrap_or(i64::MAX);
        self.record_activity(workspace_id, timeout_ms).await
    }

    /// Workspace became running
    pub async fn record_start(&self, workspace_id: &str) -> Result<u64, TrackError> {
        self.record_default_activity(workspace_id).await
    }

    /// Workspace stopped; untracked workspaces are fine
    pub async fn record_stop(&self, workspace_id: &str) -> Result<(), StoreError> {
        self.store.remove_expiration(workspace_id).await?;
        debug!(workspace_id = %workspace_id, "Stop recorded");
        Ok(())
    }

    pub async fn expiration(&self, workspace_id: &str) -> Result<Option<u64>, StoreError> {
        self.store.expiration(workspace_id).await
    }

    pub fn default_idle_timeout(&self) -> Duration {
        self.default_idle_timeout
    }

    pub fn store(&self) -> &Arc<dyn ExpirationStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    fn setup(start: u64) -> (ActivityTracker, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::with_shard_amount(4));
        let clock = Arc::new(ManualClock::new(start));
        let tracker =
            ActivityTracker::new(store.clone(), clock.clone(), Duration::from_secs(60)).unwrap();
        (tracker, store, clock)
    }

    #[tokio::test]
    async fn test_activity_slides_deadline() {
        let (tracker, store, clock) = setup(1_000);

        assert_eq!(tracker.record_activity("ws-2", 5_000).await.unwrap(), 6_000);
        clock.advance(3_000);
        assert_eq!(tracker.record_activity("ws-2", 5_000).await.unwrap(), 9_000);

        assert!(store.expired(7_000).is_empty());
        assert_eq!(store.expired(9_000), vec!["ws-2"]);
    }

    #[tokio::test]
    async fn test_last_call_wins_even_if_shorter() {
        let (tracker, store, _clock) = setup(0);
        tracker.record_activity("ws", 10_000).await.unwrap();
        tracker.record_activity("ws", 1_000).await.unwrap();
        assert_eq!(store.get("ws"), Some(1_000));
    }

    #[tokio::test]
    async fn test_non_positive_timeout_is_rejected() {
        let (tracker, store, _clock) = setup(0);

        for bad in [0, -1, i64::MIN] {
            let err = tracker.record_activity("ws-3", bad).await.unwrap_err();
            assert!(matches!(
                err,
                TrackError::Config(ConfigError::NonPositive { value_ms, .. }) if value_ms == bad
            ));
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_default_activity_and_stop() {
        let (tracker, store, _clock) = setup(500);

        assert_eq!(tracker.record_start("ws").await.unwrap(), 60_500);
        assert_eq!(tracker.expiration("ws").await.unwrap(), Some(60_500));

        tracker.record_stop("ws").await.unwrap();
        tracker.record_stop("ws").await.unwrap();
        assert!(store.expired(u64::MAX).is_empty());
    }

    #[test]
    fn test_zero_default_timeout_rejected() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        assert!(ActivityTracker::new(store, clock, Duration::ZERO).is_err());
    }
}
