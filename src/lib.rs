//! LAPSE - Workspace Activity Tracking and Idle Expiration
//!
//! Records per-workspace liveness as an absolute expiration deadline and
//! runs a periodic sweeper that asks an external coordinator to stop
//! every workspace whose deadline has passed. Enforcement is
//! at-least-once: a failed stop is retried on the next sweep.

pub mod clock;
pub mod error;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod sweeper;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, StopError, StoreError, TrackError};
pub use metrics::SweepMetrics;
pub use server::{ActivityServer, Client, Config, Service};
pub use storage::{
    ExpirationRecord, ExpirationStore, MemoryStore, PersistentConfig, PersistentStore, ReapOutcome,
};
pub use sweeper::{
    CommandStopCoordinator, LogOnlyStopCoordinator, StopCoordinator, SweepReport, SweepState,
    Sweeper, SweeperConfig, SweeperHandle,
};
pub use tracker::ActivityTracker;
