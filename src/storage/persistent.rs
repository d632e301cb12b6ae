//! Journal-backed Expiration Store
//!
//! Every mutation is appended to the journal before it reaches the
//! in-memory index. Reads never touch the file.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::journal::{Journal, JournalEntry, JournalSync};
use super::{ExpirationStore, MemoryStore, ReapOutcome};
use crate::error::StoreResult;

/// Persistent store configuration
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Journal file path
    pub path: PathBuf,
    /// Sync mode
    pub sync: JournalSync,
    /// Journal records before a rewrite is considered
    pub rewrite_threshold: usize,
    /// Shards in the in-memory index
    pub shard_amount: usize,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/expirations.journal"),
            sync: JournalSync::Flush,
            rewrite_threshold: 100_000,
            shard_amount: num_cpus::get() * 4,
        }
    }
}

impl PersistentConfig {
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_sync(mut self, sync: JournalSync) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_rewrite_threshold(mut self, threshold: usize) -> Self {
        self.rewrite_threshold = threshold;
        self
    }
}

#[derive(Debug)]
struct Inner {
    memory: MemoryStore,
    // Held across append + apply so journal order matches index order.
    // Never held while a rewrite is written out.
    journal: Mutex<Journal>,
    rewrite_threshold: usize,
    rewriting: AtomicBool,
}

impl Inner {
    fn set(&self, workspace_id: &str, expires_at: u64) -> StoreResult<()> {
        let due = {
            let mut journal = self.journal.lock();
            journal.append(&JournalEntry::set(workspace_id, expires_at))?;
            self.memory.set(workspace_id, expires_at);
            self.rewrite_due(&journal)
        };
        if due {
            self.rewrite();
        }
        Ok(())
    }

    fn remove(&self, workspace_id: &str) -> StoreResult<()> {
        let due = {
            let mut journal = self.journal.lock();
            if self.memory.get(workspace_id).is_none() {
                return Ok(());
            }
            journal.append(&JournalEntry::remove(workspace_id))?;
            self.memory.remove(workspace_id);
            self.rewrite_due(&journal)
        };
        if due {
            self.rewrite();
        }
        Ok(())
    }

    fn remove_expired(&self, workspace_id: &str, threshold: u64) -> StoreResult<ReapOutcome> {
        let due = {
            let mut journal = self.journal.lock();
            match self.memory.get(workspace_id) {
                Some(at) if at <= threshold => {
                    journal.append(&JournalEntry::remove(workspace_id))?;
                    self.memory.remove(workspace_id);
                    self.rewrite_due(&journal)
                }
                Some(at) => return Ok(ReapOutcome::Rearmed(at)),
                None => return Ok(ReapOutcome::Missing),
            }
        };
        if due {
            self.rewrite();
        }
        Ok(ReapOutcome::Removed)
    }

    fn rewrite_due(&self, journal: &Journal) -> bool {
        let count = journal.entry_count();
        count >= self.rewrite_threshold && count > self.memory.len() * 2
    }

    /// Compact the journal. Only the start and the final swap take the
    /// journal lock; writes in between are replayed into the new file.
    /// The triggering write is already durable, so a failed rewrite only
    /// leaves a longer journal behind.
    fn rewrite(&self) {
        if self.rewriting.swap(true, Ordering::AcqRel) {
            return;
        }

        let tmp_path = self.journal.lock().begin_rewrite();
        let records = self.memory.records();
        let result = Journal::stage(&tmp_path, &records)
            .and_then(|staged| self.journal.lock().commit_rewrite(staged));

        match result {
            Ok(entries) => info!(live = records.len(), entries, "Journal rewritten"),
            Err(e) => {
                self.journal.lock().abort_rewrite();
                warn!(error = %e, "Journal rewrite failed");
            }
        }
        self.rewriting.store(false, Ordering::Release);
    }
}

/// Expiration store that survives restarts
#[derive(Debug, Clone)]
pub struct PersistentStore {
    inner: Arc<Inner>,
}

impl PersistentStore {
    /// Open the journal, replaying it into a fresh index
    pub fn open(config: PersistentConfig) -> StoreResult<Self> {
        let (journal, entries) = Journal::open(&config.path, config.sync)?;
        let memory = MemoryStore::with_shard_amount(config.shard_amount);

        for entry in entries {
            match entry {
                JournalEntry::Set {
                    workspace_id,
                    expires_at,
                } => memory.set(&workspace_id, expires_at),
                JournalEntry::Remove { workspace_id } => {
                    memory.remove(&workspace_id);
                }
            }
        }
        debug!(tracked = memory.len(), "Expiration index restored");

        Ok(Self {
            inner: Arc::new(Inner {
                memory,
                journal: Mutex::new(journal),
                rewrite_threshold: config.rewrite_threshold,
                rewriting: AtomicBool::new(false),
            }),
        })
    }

    /// Records currently in the journal file
    pub fn journal_len(&self) -> usize {
        self.inner.journal.lock().entry_count()
    }
}

#[async_trait]
impl ExpirationStore for PersistentStore {
    async fn set_expiration(&self, workspace_id: &str, expires_at: u64) -> StoreResult<()> {
        let inner = self.inner.clone();
        let id = workspace_id.to_owned();
        tokio::task::spawn_blocking(move || inner.set(&id, expires_at)).await?
    }

    async fn remove_expiration(&self, workspace_id: &str) -> StoreResult<()> {
        let inner = self.inner.clone();
        let id = workspace_id.to_owned();
        tokio::task::spawn_blocking(move || inner.remove(&id)).await?
    }

    async fn find_expired(&self, threshold: u64) -> StoreResult<Vec<String>> {
        Ok(self.inner.memory.expired(threshold))
    }

    async fn remove_expired(
        &self,
        workspace_id: &str,
        threshold: u64,
    ) -> StoreResult<ReapOutcome> {
        let inner = self.inner.clone();
        let id = workspace_id.to_owned();
        tokio::task::spawn_blocking(move || inner.remove_expired(&id, threshold)).await?
    }

    async fn expiration(&self, workspace_id: &str) -> StoreResult<Option<u64>> {
        Ok(self.inner.memory.get(workspace_id))
    }

    async fn tracked(&self) -> StoreResult<usize> {
        Ok(self.inner.memory.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &tempfile::TempDir) -> PersistentConfig {
        PersistentConfig::default()
            .with_path(dir.path().join("exp.journal"))
            .with_rewrite_threshold(1_000)
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = PersistentStore::open(config(&dir)).unwrap();
            store.set_expiration("ws-1", 60_000).await.unwrap();
            store.set_expiration("ws-2", 30_000).await.unwrap();
            store.set_expiration("ws-1", 90_000).await.unwrap();
            store.remove_expiration("ws-2").await.unwrap();
        }

        let store = PersistentStore::open(config(&dir)).unwrap();
        assert_eq!(store.expiration("ws-1").await.unwrap(), Some(90_000));
        assert_eq!(store.expiration("ws-2").await.unwrap(), None);
        assert_eq!(store.find_expired(90_000).await.unwrap(), vec!["ws-1"]);
    }

    #[tokio::test]
    async fn test_absent_remove_is_not_journaled() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(config(&dir)).unwrap();

        store.remove_expiration("ghost").await.unwrap();
        store.remove_expiration("ghost").await.unwrap();
        assert_eq!(store.journal_len(), 0);
    }

    #[tokio::test]
    async fn test_remove_expired_is_conditional() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(config(&dir)).unwrap();
        store.set_expiration("ws", 5_000).await.unwrap();

        assert_eq!(
            store.remove_expired("ws", 4_999).await.unwrap(),
            ReapOutcome::Rearmed(5_000)
        );
        assert_eq!(
            store.remove_expired("ws", 5_000).await.unwrap(),
            ReapOutcome::Removed
        );
        assert_eq!(store.tracked().await.unwrap(), 0);
        assert_eq!(
            store.remove_expired("ws", 5_000).await.unwrap(),
            ReapOutcome::Missing
        );
        assert_eq!(store.journal_len(), 2);
    }

    #[tokio::test]
    async fn test_rewrite_compacts_journal() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir).with_rewrite_threshold(8);
        let store = PersistentStore::open(cfg.clone()).unwrap();

        for deadline in 0..20u64 {
            store.set_expiration("hot", deadline).await.unwrap();
        }
        store.set_expiration("cold", 7).await.unwrap();
        assert!(store.journal_len() < 8);
        drop(store);

        let store = PersistentStore::open(cfg).unwrap();
        assert_eq!(store.expiration("hot").await.unwrap(), Some(19));
        assert_eq!(store.expiration("cold").await.unwrap(), Some(7));
    }
}
