//! Sharded In-Memory Expiration Store
//!
//! Each shard keeps a hashmap for point lookups and a BTreeSet ordered by
//! deadline for range scans. Writers lock a single shard, so pings for
//! different workspaces rarely contend.

use async_trait::async_trait;
use hashbrown::{DefaultHashBuilder, HashMap};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::Arc;

use super::{ExpirationRecord, ExpirationStore, ReapOutcome};
use crate::error::StoreResult;

#[derive(Debug, Default)]
struct Shard {
    by_id: HashMap<String, u64>,
    by_deadline: BTreeSet<(u64, String)>,
}

impl Shard {
    fn upsert(&mut self, workspace_id: &str, expires_at: u64) {
        if let Some(prev) = self.by_id.insert(workspace_id.to_owned(), expires_at) {
            self.by_deadline.remove(&(prev, workspace_id.to_owned()));
        }
        self.by_deadline.insert((expires_at, workspace_id.to_owned()));
    }

    fn remove(&mut self, workspace_id: &str) -> Option<u64> {
        let prev = self.by_id.remove(workspace_id)?;
        self.by_deadline.remove(&(prev, workspace_id.to_owned()));
        Some(prev)
    }
}

/// Concurrent in-memory expiration store
#[derive(Clone)]
pub struct MemoryStore {
    shards: Arc<[RwLock<Shard>]>,
    hasher: DefaultHashBuilder,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("shards", &self.shards.len())
            .field("tracked", &self.len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store with four shards per CPU
    pub fn new() -> Self {
        Self::with_shard_amount(num_cpus::get() * 4)
    }

    /// Create with specified shard count for better concurrency
    pub fn with_shard_amount(shard_amount: usize) -> Self {
        let shards: Vec<_> = (0..shard_amount.max(1))
            .map(|_| RwLock::new(Shard::default()))
            .collect();
        Self {
            shards: shards.into(),
            hasher: DefaultHashBuilder::default(),
        }
    }

    #[inline]
    fn shard(&self, workspace_id: &str) -> &RwLock<Shard> {
        let idx = self.hasher.hash_one(workspace_id) as usize % self.shards.len();
        &self.shards[idx]
    }

    #[inline]
    pub fn set(&self, workspace_id: &str, expires_at: u64) {
        self.shard(workspace_id).write().upsert(workspace_id, expires_at);
    }

    /// Delete record, returns the previous deadline
    #[inline]
    pub fn remove(&self, workspace_id: &str) -> Option<u64> {
        self.shard(workspace_id).write().remove(workspace_id)
    }

    /// Compare-and-delete against a deadline threshold
    pub fn remove_if_expired(&self, workspace_id: &str, threshold: u64) -> ReapOutcome {
        let mut shard = self.shard(workspace_id).write();
        match shard.by_id.get(workspace_id) {
            Some(&at) if at <= threshold => {
                shard.remove(workspace_id);
                ReapOutcome::Removed
            }
            Some(&at) => ReapOutcome::Rearmed(at),
            None => ReapOutcome::Missing,
        }
    }

    #[inline]
    pub fn get(&self, workspace_id: &str) -> Option<u64> {
        self.shard(workspace_id).read().by_id.get(workspace_id).copied()
    }

    /// Expired ids, oldest deadline first. Each shard is read consistently;
    /// the result as a whole is not a global snapshot.
    pub fn expired(&self, threshold: u64) -> Vec<String> {
        let mut hits: Vec<(u64, String)> = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.read();
            hits.extend(
                shard
                    .by_deadline
                    .iter()
                    .take_while(|(at, _)| *at <= threshold)
                    .cloned(),
            );
        }
        hits.sort_unstable();
        hits.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().by_id.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every live record (used for journal rewrites)
    pub fn records(&self) -> Vec<ExpirationRecord> {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let shard = shard.read();
            out.extend(shard.by_id.iter().map(|(id, &at)| ExpirationRecord {
                workspace_id: id.clone(),
                expires_at: at,
            }));
        }
        out
    }

    pub fn shards(&self) -> usize {
        self.shards.len()
    }
}

#[async_trait]
impl ExpirationStore for MemoryStore {
    async fn set_expiration(&self, workspace_id: &str, expires_at: u64) -> StoreResult<()> {
        self.set(workspace_id, expires_at);
        Ok(())
    }

    async fn remove_expiration(&self, workspace_id: &str) -> StoreResult<()> {
        self.remove(workspace_id);
        Ok(())
    }

    async fn find_expired(&self, threshold: u64) -> StoreResult<Vec<String>> {
        Ok(self.expired(threshold))
    }

    async fn remove_expired(
        &self,
        workspace_id: &str,
        threshold: u64,
    ) -> StoreResult<ReapOutcome> {
        Ok(self.remove_if_expired(workspace_id, threshold))
    }

    async fn expiration(&self, workspace_id: &str) -> StoreResult<Option<u64>> {
        Ok(self.get(workspace_id))
    }

    async fn tracked(&self) -> StoreResult<usize> {
        Ok(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::with_shard_amount(4);

        store.set("ws-1", 100);
        assert_eq!(store.get("ws-1"), Some(100));
        assert_eq!(store.len(), 1);

        // Last write wins, old index entry is gone
        store.set("ws-1", 500);
        assert_eq!(store.get("ws-1"), Some(500));
        assert!(store.expired(100).is_empty());
        assert_eq!(store.expired(500), vec!["ws-1".to_string()]);

        assert_eq!(store.remove("ws-1"), Some(500));
        assert_eq!(store.remove("ws-1"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_is_inclusive_and_ordered() {
        let store = MemoryStore::with_shard_amount(8);
        store.set("c", 300);
        store.set("a", 100);
        store.set("b", 200);
        store.set("d", 400);

        assert_eq!(store.expired(99), Vec::<String>::new());
        assert_eq!(store.expired(300), vec!["a", "b", "c"]);
        assert_eq!(store.expired(u64::MAX).len(), 4);
    }

    #[test]
    fn test_remove_if_expired() {
        let store = MemoryStore::with_shard_amount(2);
        store.set("ws", 1_000);

        assert_eq!(
            store.remove_if_expired("ws", 999),
            ReapOutcome::Rearmed(1_000)
        );
        assert_eq!(store.get("ws"), Some(1_000));

        assert_eq!(store.remove_if_expired("ws", 1_000), ReapOutcome::Removed);
        assert_eq!(store.get("ws"), None);
        assert_eq!(
            store.remove_if_expired("ws", u64::MAX),
            ReapOutcome::Missing
        );
    }

    #[test]
    fn test_records_snapshot() {
        let store = MemoryStore::with_shard_amount(3);
        store.set("x", 1);
        store.set("y", 2);
        let mut records = store.records();
        records.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));
        assert_eq!(
            records,
            vec![
                ExpirationRecord {
                    workspace_id: "x".into(),
                    expires_at: 1
                },
                ExpirationRecord {
                    workspace_id: "y".into(),
                    expires_at: 2
                },
            ]
        );
    }

    #[test]
    fn test_concurrent_access() {
        let store = MemoryStore::new();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let s = store.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        let id = format!("ws-{}-{}", i, j);
                        s.set(&id, (i * 100 + j) as u64);
                        assert!(s.get(&id).is_some());
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.len(), 1000);
        assert_eq!(store.expired(u64::MAX).len(), 1000);
    }

    #[test]
    fn test_single_shard_fallback() {
        let store = MemoryStore::with_shard_amount(0);
        assert_eq!(store.shards(), 1);
        store.set("ws", 5);
        assert_eq!(store.expired(5), vec!["ws"]);
    }
}
