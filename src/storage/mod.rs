//! Storage Engine
//!
//! Expiration records keyed by workspace id, with an ordered deadline
//! index for range scans. Two backends: purely in-memory and
//! journal-backed.

mod journal;
mod memory;
mod persistent;

pub use journal::{JournalCodec, JournalEntry, JournalSync};
pub use memory::MemoryStore;
pub use persistent::{PersistentConfig, PersistentStore};

use async_trait::async_trait;

use crate::error::StoreResult;

/// Stored association of a workspace with its expiration deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationRecord {
    pub workspace_id: String,
    /// Epoch millis after which the workspace may be stopped
    pub expires_at: u64,
}

/// What a conditional removal found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// The record was deleted
    Removed,
    /// The deadline moved past the threshold, record kept
    Rearmed(u64),
    /// Nothing left to delete
    Missing,
}

/// Store contract for expiration records.
///
/// Implementations provide their own concurrency control: per-key
/// atomicity for writes and a consistent read per range scan. Callers
/// never lock externally.
#[async_trait]
pub trait ExpirationStore: Send + Sync + std::fmt::Debug {
    /// Upsert the deadline for a workspace (last write wins)
    async fn set_expiration(&self, workspace_id: &str, expires_at: u64) -> StoreResult<()>;

    /// Delete the record; absent records are not an error
    async fn remove_expiration(&self, workspace_id: &str) -> StoreResult<()>;

    /// Ids whose deadline is at or before `threshold`, oldest deadline first
    async fn find_expired(&self, threshold: u64) -> StoreResult<Vec<String>>;

    /// Delete the record only if its deadline is still at or before
    /// `threshold`.
    async fn remove_expired(&self, workspace_id: &str, threshold: u64)
        -> StoreResult<ReapOutcome>;

    /// Current deadline for a workspace, if tracked
    async fn expiration(&self, workspace_id: &str) -> StoreResult<Option<u64>>;

    /// Number of tracked workspaces
    async fn tracked(&self) -> StoreResult<usize>;
}
