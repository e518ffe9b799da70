use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::scheduler::job::Job;

/// A job that has been handed to a worker and not yet finished.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Kept whole so it can be requeued verbatim on expiry
    pub job: Job,
    pub issued_at: Instant,
    pub last_heartbeat: Instant,
}

impl Lease {
    pub fn new(job: Job, issued_at: Instant) -> Self {
        Self {
            job,
            issued_at,
            last_heartbeat: issued_at,
        }
    }

    pub fn renew(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }

    /// True once strictly more than `timeout` has passed since the last heartbeat.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > timeout
    }
}

/// In-flight leases keyed by dispatch id.
///
/// Owned by the lease manager loop; nothing else holds a reference to it.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: HashMap<u64, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `job`. Returns false and keeps the existing lease if the
    /// id is already leased.
    pub fn create(&mut self, job: Job, now: Instant) -> bool {
        if self.leases.contains_key(&job.id) {
            return false;
        }
        self.leases.insert(job.id, Lease::new(job, now));
        true
    }

    /// Refresh the heartbeat. Returns false if the id is not leased.
    pub fn renew(&mut self, id: u64, now: Instant) -> bool {
        match self.leases.get_mut(&id) {
            Some(lease) => {
                lease.renew(now);
                true
            }
            None => false,
        }
    }

    /// Stop tracking `id`, returning the lease if it was present.
    pub fn complete(&mut self, id: u64) -> Option<Lease> {
        self.leases.remove(&id)
    }

    /// Remove and return every lease whose heartbeat is older than `timeout`.
    pub fn drain_expired(&mut self, now: Instant, timeout: Duration) -> Vec<Lease> {
        let expired: Vec<u64> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.is_expired(now, timeout))
            .map(|(id, _)| *id)
            .collect();

        let mut reclaimed: Vec<Lease> = expired
            .into_iter()
            .filter_map(|id| self.leases.remove(&id))
            .collect();
        reclaimed.sort_by_key(|lease| lease.issued_at);
        reclaimed
    }

    pub fn get(&self, id: u64) -> Option<&Lease> {
        self.leases.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.leases.contains_key(&id)
    }

    /// Leased ids in ascending order
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.leases.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}
