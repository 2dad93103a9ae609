//! Per-user worker registry.
//!
//! State is `user → worker → {pipelines, rank → connection}`. Each user's
//! subtree lives in its own `DashMap` entry, and the `publish` callback
//! passed to a mutation runs while that entry is still locked. Snapshots
//! for one user are therefore delivered in the order the mutations happened.
//!
//! The lock held is the write lock of the `DashMap` shard the user hashes
//! to, not a lock private to the user. Other users in the same shard wait
//! for `publish` to return, so it should only enqueue (connection sends are
//! non-blocking `try_send`s) and must not call back into the registry for
//! any user.

use dashmap::DashMap;
use stem_core::{ConnectionId, UserId, WorkerAnnouncement, WorkerId, WorkersSnapshot};

/// Process-wide registry of workers, partitioned by user.
#[derive(Default)]
pub struct WorkerRegistry {
    users: DashMap<UserId, WorkersSnapshot>,
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `connection` now serves `announcement.rank` of
    /// `announcement.worker_id`.
    ///
    /// The worker is created if absent. Its pipeline list is replaced only
    /// when the announcement carries one. Any previous occupant of the rank
    /// is superseded. `publish` receives the user's full updated subtree.
    pub fn announce<R>(
        &self,
        user: &UserId,
        connection: &ConnectionId,
        announcement: WorkerAnnouncement,
        publish: impl FnOnce(&WorkersSnapshot) -> R,
    ) -> R {
        let mut workers = self.users.entry(user.clone()).or_default();
        let worker = workers.entry(announcement.worker_id).or_default();
        if let Some(pipelines) = announcement.pipelines {
            worker.pipelines = pipelines;
        }
        let _ = worker.ranks.insert(announcement.rank, connection.clone());
        publish(&*workers)
    }

    /// Remove every rank slot held by `connection` across the user's workers.
    ///
    /// Workers left without ranks are deleted. Returns `None` (and does not
    /// call `publish`) when the connection held no slot; otherwise `publish`
    /// receives the updated subtree.
    pub fn remove_connection<R>(
        &self,
        user: &UserId,
        connection: &ConnectionId,
        publish: impl FnOnce(&WorkersSnapshot) -> R,
    ) -> Option<R> {
        let result = {
            let mut workers = self.users.get_mut(user)?;
            let mut removed = 0usize;
            for view in workers.values_mut() {
                let before = view.ranks.len();
                view.ranks.retain(|_, occupant| occupant != connection);
                removed += before - view.ranks.len();
            }
            if removed == 0 {
                return None;
            }
            workers.retain(|_, view| !view.ranks.is_empty());
            publish(&*workers)
        };
        let _ = self.users.remove_if(user, |_, workers| workers.is_empty());
        Some(result)
    }

    /// Run `f` on the user's subtree under the user's lock.
    ///
    /// Used to send the connect-time snapshot so it cannot interleave with
    /// a concurrent mutation's broadcast.
    pub fn read_user<R>(&self, user: &UserId, f: impl FnOnce(&WorkersSnapshot) -> R) -> R {
        let result = {
            let workers = self.users.entry(user.clone()).or_default();
            f(&*workers)
        };
        let _ = self.users.remove_if(user, |_, workers| workers.is_empty());
        result
    }

    /// Copy of the user's subtree (empty if the user has no workers).
    pub fn snapshot(&self, user: &UserId) -> WorkersSnapshot {
        self.users
            .get(user)
            .map(|workers| workers.value().clone())
            .unwrap_or_default()
    }

    /// Connections currently serving any rank of `worker`, in rank order.
    /// Empty for an unknown worker.
    pub fn rank_connections(&self, user: &UserId, worker: &WorkerId) -> Vec<ConnectionId> {
        self.users
            .get(user)
            .and_then(|workers| {
                workers
                    .get(worker)
                    .map(|view| view.ranks.values().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Number of users with at least one worker.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Total workers across all users.
    pub fn worker_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }
}
