use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scheduler::barrier::GroupBarrier;
use crate::scheduler::job::Job;
use crate::scheduler::queue::JobQueue;
use crate::source::JobSource;

/// Stats for one group, taken once its barrier drained.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    /// 1-based group number
    pub group: usize,
    pub jobs: usize,
    pub elapsed: Duration,
    pub avg_seconds_per_job: f64,
    pub avg_seconds_per_item: f64,
    /// Source offset after the group, for resuming a later run
    pub offset: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProducerSummary {
    pub groups: Vec<GroupReport>,
    pub jobs: u64,
    /// False if shutdown interrupted production
    pub completed: bool,
}

/// Pulls batches from a [`JobSource`] in groups, and holds the next group back
/// until every job produced so far has been finished.
pub struct GatedProducer {
    source: Box<dyn JobSource>,
    queue: JobQueue,
    barrier: GroupBarrier,
    group_size: usize,
    batch_size: usize,
    next_id: u64,
}

impl GatedProducer {
    pub fn new(
        source: Box<dyn JobSource>,
        queue: JobQueue,
        barrier: GroupBarrier,
        group_size: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            queue,
            barrier,
            group_size,
            batch_size,
            next_id: 0,
        }
    }

    /// Produce until the source reports its last batch and all of its jobs are
    /// finished, or until `shutdown` fires.
    ///
    /// The barrier is raised before each push so a worker that finishes the job
    /// immediately can never release it first.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ProducerSummary> {
        let mut summary = ProducerSummary::default();
        let mut group = 1;

        loop {
            let group_start = Instant::now();
            let mut jobs_in_group = 0;
            let mut end_of_stream = false;

            for _ in 0..self.group_size {
                let batch = tokio::select! {
                    _ = shutdown.cancelled() => return Ok(summary),
                    batch = self.source.next_batch(self.batch_size) => batch?,
                };

                if batch.payload.is_empty() {
                    tracing::debug!(offset = %self.source.offset(), "Source returned an empty batch");
                } else {
                    let job = Job::batch(self.next_id, batch.payload);
                    let job_id = job.id;
                    self.next_id += 1;

                    self.barrier.add();
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::warn!(job_id, "Shutdown while queueing job, dropping it");
                            return Ok(summary);
                        }
                        pushed = self.queue.push(job) => {
                            if let Err(e) = pushed {
                                self.barrier.done();
                                return Err(e);
                            }
                        }
                    }
                    tracing::debug!(job_id, group, "Job queued");
                    jobs_in_group += 1;
                    summary.jobs += 1;
                }

                if batch.last {
                    end_of_stream = true;
                    tracing::info!(jobs = summary.jobs, "Queued all jobs");
                    break;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(summary),
                _ = self.barrier.wait() => {}
            }

            if jobs_in_group > 0 {
                let report = self.report(group, jobs_in_group, group_start.elapsed());
                tracing::info!(
                    group = report.group,
                    jobs = report.jobs,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    avg_seconds_per_job = report.avg_seconds_per_job,
                    avg_seconds_per_paragraph = report.avg_seconds_per_item,
                    offset = %report.offset,
                    "Finished processing group"
                );
                summary.groups.push(report);
                group += 1;
            }

            if end_of_stream {
                tracing::info!(
                    groups = summary.groups.len(),
                    jobs = summary.jobs,
                    "Finished all jobs"
                );
                summary.completed = true;
                return Ok(summary);
            }
        }
    }

    fn report(&self, group: usize, jobs: usize, elapsed: Duration) -> GroupReport {
        let secs = elapsed.as_secs_f64();
        let items = (jobs * self.batch_size).max(1);
        GroupReport {
            group,
            jobs,
            elapsed,
            avg_seconds_per_job: secs / jobs as f64,
            avg_seconds_per_item: secs / items as f64,
            offset: self.source.offset(),
        }
    }
}
