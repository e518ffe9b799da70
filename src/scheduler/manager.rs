use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ManagerError, Result};
use crate::scheduler::barrier::GroupBarrier;
use crate::scheduler::job::{Job, JobKind};
use crate::scheduler::lease::LeaseTable;
use crate::scheduler::queue::JobQueue;

/// Messages accepted by the lease manager loop. Every change to the lease
/// table is a reaction to one of these, handled one at a time in arrival order.
#[derive(Debug)]
pub enum StateUpdate {
    /// A worker received `job`; start its lease
    JobRequested { job: Job, issued_at: Instant },
    /// A worker finished the job with this dispatch id
    JobFinished { id: u64 },
    /// A worker is still working on the job with this dispatch id
    HealthUpdate { id: u64 },
    /// Reclaim every lease whose heartbeat has expired
    Sweep,
    /// Report the current table without changing it
    Inspect {
        response_tx: oneshot::Sender<LeaseStats>,
    },
}

/// Point-in-time view of the lease table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseStats {
    pub in_flight: usize,
    pub leased_ids: Vec<u64>,
    /// Batch jobs produced but not yet finished
    pub outstanding: u64,
}

/// Cloneable sender side of the lease manager inbox.
///
/// The inbox is unbounded, so none of these calls ever wait on the manager.
#[derive(Debug, Clone)]
pub struct LeaseHandle {
    tx: mpsc::UnboundedSender<StateUpdate>,
}

impl LeaseHandle {
    fn send(&self, update: StateUpdate) -> Result<()> {
        self.tx
            .send(update)
            .map_err(|_| ManagerError::LeaseManagerStopped)
    }

    pub fn job_requested(&self, job: Job, issued_at: Instant) -> Result<()> {
        self.send(StateUpdate::JobRequested { job, issued_at })
    }

    pub fn job_finished(&self, id: u64) -> Result<()> {
        self.send(StateUpdate::JobFinished { id })
    }

    pub fn update_health(&self, id: u64) -> Result<()> {
        self.send(StateUpdate::HealthUpdate { id })
    }

    pub fn sweep(&self) -> Result<()> {
        self.send(StateUpdate::Sweep)
    }

    /// Ask the manager for a snapshot. Resolves after every message sent
    /// before it has been handled.
    pub async fn stats(&self) -> Result<LeaseStats> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(StateUpdate::Inspect { response_tx })?;
        response_rx
            .await
            .map_err(|_| ManagerError::LeaseManagerStopped)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Single owner of the lease table.
pub struct LeaseManager {
    leases: LeaseTable,
    queue: JobQueue,
    barrier: GroupBarrier,
    health_timeout: Duration,
}

impl LeaseManager {
    pub fn new(
        queue: JobQueue,
        barrier: GroupBarrier,
        health_timeout: Duration,
    ) -> (Self, LeaseHandle, mpsc::UnboundedReceiver<StateUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            leases: LeaseTable::new(),
            queue,
            barrier,
            health_timeout,
        };
        (manager, LeaseHandle { tx }, rx)
    }

    /// Process inbox messages until `shutdown` fires or every handle is dropped.
    pub async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<StateUpdate>,
        shutdown: CancellationToken,
    ) {
        tracing::info!(
            health_timeout_ms = self.health_timeout.as_millis() as u64,
            "Lease manager started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(in_flight = self.leases.len(), "Lease manager shutting down");
                    break;
                }
                msg = inbox.recv() => {
                    let Some(update) = msg else {
                        tracing::info!("Lease manager inbox closed");
                        break;
                    };
                    if !self.handle(update, &shutdown).await {
                        break;
                    }
                }
            }
        }
    }

    /// Apply one message. Returns false if shutdown interrupted a requeue.
    async fn handle(&mut self, update: StateUpdate, shutdown: &CancellationToken) -> bool {
        match update {
            StateUpdate::JobRequested { job, issued_at } => {
                self.lease_create(job, issued_at);
            }
            StateUpdate::JobFinished { id } => {
                self.lease_complete(id);
            }
            StateUpdate::HealthUpdate { id } => {
                self.lease_renew(id);
            }
            StateUpdate::Sweep => {
                return self.lease_sweep(shutdown).await;
            }
            StateUpdate::Inspect { response_tx } => {
                let _ = response_tx.send(LeaseStats {
                    in_flight: self.leases.len(),
                    leased_ids: self.leases.ids(),
                    outstanding: self.barrier.outstanding(),
                });
            }
        }
        true
    }

    fn lease_create(&mut self, job: Job, issued_at: Instant) {
        let job_id = job.id;
        let kind = job.kind;
        if kind == JobKind::Wait {
            tracing::warn!(job_id, "Ignoring lease request for a wait job");
            return;
        }
        if self.leases.create(job, issued_at) {
            tracing::debug!(job_id, kind = %kind, "Lease created");
        } else {
            tracing::warn!(job_id, "Lease already exists for job, keeping the original");
        }
    }

    fn lease_renew(&mut self, job_id: u64) {
        if self.leases.renew(job_id, Instant::now()) {
            tracing::debug!(job_id, "Lease renewed");
        } else {
            tracing::warn!(job_id, "Heartbeat for a job that is not leased");
        }
    }

    /// The barrier is released only when a batch lease was actually removed
    /// here. Duplicate finishes and finishes for reclaimed ids release nothing.
    fn lease_complete(&mut self, job_id: u64) {
        match self.leases.complete(job_id) {
            Some(lease) => {
                tracing::debug!(
                    job_id,
                    held_ms = lease.issued_at.elapsed().as_millis() as u64,
                    "Lease completed"
                );
                if lease.job.kind == JobKind::Batch {
                    self.barrier.done();
                }
            }
            None => {
                tracing::warn!(job_id, "Finish for a job that is not leased");
            }
        }
    }

    async fn lease_sweep(&mut self, shutdown: &CancellationToken) -> bool {
        let reclaimed = self
            .leases
            .drain_expired(Instant::now(), self.health_timeout);

        for lease in reclaimed {
            let job_id = lease.job.id;
            tracing::warn!(
                job_id,
                silent_ms = lease.last_heartbeat.elapsed().as_millis() as u64,
                "Job has timed out, requeueing"
            );
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::warn!(job_id, "Shutdown while requeueing expired job, dropping it");
                    return false;
                }
                result = self.queue.push(lease.job) => {
                    if let Err(e) = result {
                        tracing::error!(job_id, error = %e, "Failed to requeue expired job");
                    }
                }
            }
        }
        true
    }
}
