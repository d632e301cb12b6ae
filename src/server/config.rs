//! Server Configuration

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;
use crate::storage::{JournalSync, PersistentConfig};
use crate::sweeper::SweeperConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub bind: String,

    /// Port number
    pub port: u16,

    /// Time between expiration sweeps
    pub sweep_interval: Duration,

    /// Idle timeout applied when a ping carries none
    pub default_idle_timeout: Duration,

    /// Upper bound on a single stop request
    pub stop_timeout: Duration,

    /// Stop requests allowed to run at once
    pub max_concurrent_stops: usize,

    /// Journal file (None = in-memory only)
    pub journal_path: Option<PathBuf>,

    /// Journal sync mode
    pub journal_sync: JournalSync,

    /// Journal records before a rewrite is considered
    pub rewrite_threshold: usize,

    /// Store shards (0 = auto-detect)
    pub shard_amount: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7460,
            sweep_interval: Duration::from_secs(30),
            default_idle_timeout: Duration::from_secs(30 * 60),
            stop_timeout: Duration::from_secs(60),
            max_concurrent_stops: 16,
            journal_path: None,
            journal_sync: JournalSync::Flush,
            rewrite_threshold: 100_000,
            shard_amount: 0, // Auto-detect (4 per core)
        }
    }
}

impl Config {
    /// Create a new config with custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Create a new config with custom bind address
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.default_idle_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_stops(mut self, n: usize) -> Self {
        self.max_concurrent_stops = n;
        self
    }

    /// Persist expirations to a journal file
    pub fn with_journal(mut self, path: impl Into<PathBuf>, sync: JournalSync) -> Self {
        self.journal_path = Some(path.into());
        self.journal_sync = sync;
        self
    }

    pub fn with_rewrite_threshold(mut self, threshold: usize) -> Self {
        self.rewrite_threshold = threshold;
        self
    }

    pub fn with_shard_amount(mut self, shards: usize) -> Self {
        self.shard_amount = shards;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn shards(&self) -> usize {
        if self.shard_amount == 0 {
            num_cpus::get() * 4
        } else {
            self.shard_amount
        }
    }

    /// Check durations and limits. A sweep interval above half the idle
    /// timeout is allowed but logged, since it widens the stop overrun.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_duration("default idle timeout", self.default_idle_timeout)?;
        self.sweeper().validate()?;
        if self.rewrite_threshold == 0 {
            return Err(ConfigError::Zero("rewrite threshold"));
        }

        if self.sweep_interval > self.default_idle_timeout / 2 {
            warn!(
                sweep_interval = ?self.sweep_interval,
                idle_timeout = ?self.default_idle_timeout,
                "Sweep interval exceeds half the idle timeout"
            );
        }
        Ok(())
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig::default()
            .with_interval(self.sweep_interval)
            .with_stop_timeout(self.stop_timeout)
            .with_max_concurrent_stops(self.max_concurrent_stops)
    }

    /// Journal settings, when persistence is enabled
    pub fn persistence(&self) -> Option<PersistentConfig> {
        let path = self.journal_path.as_ref()?;
        let mut config = PersistentConfig::default()
            .with_path(path.clone())
            .with_sync(self.journal_sync)
            .with_rewrite_threshold(self.rewrite_threshold);
        config.shard_amount = self.shards();
        Some(config)
    }
}
