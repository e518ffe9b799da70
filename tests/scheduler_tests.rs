use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use job_manager::scheduler::{
    GroupBarrier, Job, JobKind, JobPayload, JobQueue, LeaseHandle, LeaseManager, LeaseTable,
};

fn batch_job(id: u64) -> Job {
    Job::batch(id, JobPayload::Paragraphs(vec![format!("data{}", id)]))
}

/// Start a lease manager loop; returns its handle plus the shared queue and barrier.
fn start_manager(timeout: Duration) -> (LeaseHandle, JobQueue, GroupBarrier, CancellationToken) {
    let queue = JobQueue::new(8);
    let barrier = GroupBarrier::new();
    let shutdown = CancellationToken::new();
    let (manager, handle, inbox) = LeaseManager::new(queue.clone(), barrier.clone(), timeout);
    tokio::spawn(manager.run(inbox, shutdown.clone()));
    (handle, queue, barrier, shutdown)
}

#[test]
fn test_job_creation() {
    let job = batch_job(3);
    assert_eq!(job.id, 3);
    assert_eq!(job.kind, JobKind::Batch);
    assert!(!job.is_wait());

    let on_demand = Job::on_demand(JobPayload::ParagraphIds(vec!["p".to_string()]));
    assert_eq!(on_demand.kind, JobKind::OnDemand);
}

#[test]
fn test_lease_table_lifecycle() {
    let mut table = LeaseTable::new();
    let start = Instant::now();

    assert!(table.create(batch_job(1), start));
    assert!(table.create(batch_job(2), start));
    assert_eq!(table.len(), 2);

    assert!(table.renew(1, start + Duration::from_millis(500)));
    let lease = table.get(1).unwrap();
    assert_eq!(lease.issued_at, start);
    assert_eq!(lease.last_heartbeat, start + Duration::from_millis(500));

    let reclaimed = table.drain_expired(start + Duration::from_millis(1200), Duration::from_secs(1));
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].job.id, 2);

    assert!(table.complete(1).is_some());
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_wait_job_is_never_leased() {
    let (leases, _queue, _barrier, _shutdown) = start_manager(Duration::from_secs(1));

    leases.job_requested(Job::wait(), Instant::now()).unwrap();

    assert_eq!(leases.stats().await.unwrap().in_flight, 0);
}

#[tokio::test]
async fn test_duplicate_lease_request_keeps_original() {
    let (leases, _queue, barrier, _shutdown) = start_manager(Duration::from_secs(1));
    barrier.add();

    leases.job_requested(batch_job(5), Instant::now()).unwrap();
    leases.job_requested(batch_job(5), Instant::now()).unwrap();

    let stats = leases.stats().await.unwrap();
    assert_eq!(stats.leased_ids, vec![5]);

    leases.job_finished(5).unwrap();
    leases.job_finished(5).unwrap();
    let stats = leases.stats().await.unwrap();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.outstanding, 0);
    assert_eq!(barrier.outstanding(), 0);
}

#[tokio::test]
async fn test_sweep_requeues_job_verbatim() {
    let timeout = Duration::from_millis(50);
    let (leases, queue, barrier, _shutdown) = start_manager(timeout);
    barrier.add();

    let job = batch_job(9);
    leases.job_requested(job.clone(), Instant::now()).unwrap();
    tokio::time::sleep(timeout * 2).await;
    leases.sweep().unwrap();
    leases.stats().await.unwrap();

    let requeued = queue.pop_timeout(Duration::from_millis(50)).await.unwrap();
    assert_eq!(requeued, job);
    assert_eq!(barrier.outstanding(), 1);
}

#[tokio::test]
async fn test_sweeper_triggers_reclaim() {
    let timeout = Duration::from_millis(50);
    let (leases, queue, _barrier, shutdown) = start_manager(timeout);

    let sweeper_leases = leases.clone();
    let sweeper_shutdown = shutdown.clone();
    tokio::spawn(async move {
        job_manager::scheduler::HealthSweeper::new(Duration::from_millis(20))
            .run(sweeper_leases, sweeper_shutdown)
            .await;
    });

    leases.job_requested(batch_job(1), Instant::now()).unwrap();

    let requeued = queue.pop_timeout(Duration::from_millis(500)).await;
    assert_eq!(requeued.map(|j| j.id), Some(1));
    assert_eq!(leases.stats().await.unwrap().in_flight, 0);
}
