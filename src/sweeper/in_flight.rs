//! In-flight Stop Set
//!
//! Add-if-absent guard keyed by workspace id. The guard releases the id
//! when dropped, whatever the outcome of the stop attempt.

use dashmap::DashSet;
use std::sync::Arc;

/// Workspaces with a stop request currently outstanding
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<DashSet<String>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a workspace, or `None` if a stop is already outstanding
    pub fn try_acquire(&self, workspace_id: &str) -> Option<InFlightGuard> {
        if self.ids.insert(workspace_id.to_owned()) {
            Some(InFlightGuard {
                ids: self.ids.clone(),
                workspace_id: workspace_id.to_owned(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, workspace_id: &str) -> bool {
        self.ids.contains(workspace_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Releases its workspace id on drop
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<DashSet<String>>,
    workspace_id: String,
}

impl InFlightGuard {
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids.remove(&self.workspace_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_acquire_release() {
        let in_flight = InFlight::new();

        let guard = in_flight.try_acquire("ws-1").unwrap();
        assert_eq!(guard.workspace_id(), "ws-1");
        assert!(in_flight.contains("ws-1"));
        assert!(in_flight.try_acquire("ws-1").is_none());
        assert!(in_flight.try_acquire("ws-2").is_some());

        drop(guard);
        assert!(!in_flight.contains("ws-1"));
        assert!(in_flight.try_acquire("ws-1").is_some());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let in_flight = InFlight::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let f = in_flight.clone();
                thread::spawn(move || f.try_acquire("contended").map(std::mem::forget).is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(in_flight.len(), 1);
    }
}
