//! Lease lifecycle tests driven through the dispatch service.
//!
//! These validate that:
//! - request/finish cycles leave the lease table empty and the barrier at zero
//! - duplicate or stale finishes never release the barrier twice
//! - heartbeats for unknown ids never create leases
//! - sweeps reclaim only leases whose heartbeat is older than the timeout


use std::time::Duration;

use job_manager::proto::JobType;
use job_manager::scheduler::{Job, JobPayload};
use test_harness::TestManager;

const TIMEOUT: Duration = Duration::from_millis(200);

/// Queue a batch job the way the producer does, raising the barrier first.
async fn produce(tm: &TestManager, id: u64) {
    tm.barrier.add();
    tm.queue
        .push(Job::batch(
            id,
            JobPayload::Paragraphs(vec![format!("data{}", id)]),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_request_finish_cycles_drain_table_and_barrier() {
    let tm = TestManager::start(TIMEOUT, None);
    for id in 0..5 {
        produce(&tm, id).await;
    }
    assert_eq!(tm.barrier.outstanding(), 5);

    let mut dispatched = Vec::new();
    for _ in 0..5 {
        let job = tm.request().await;
        assert_eq!(job.r#type, JobType::Batch as i32);
        dispatched.push(job.id);
    }
    assert_eq!(tm.stats().await.in_flight, 5);

    for id in dispatched {
        tm.finish(id).await;
    }

    let stats = tm.stats().await;
    assert_eq!(stats.in_flight, 0);
    assert!(stats.leased_ids.is_empty());
    assert_eq!(tm.barrier.outstanding(), 0);
}

#[tokio::test]
async fn test_dispatch_ids_are_fresh_and_increasing() {
    let tm = TestManager::start(TIMEOUT, None);
    produce(&tm, 0).await;
    produce(&tm, 1).await;

    let first = tm.request().await;
    let second = tm.request().await;
    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2);
    assert_eq!(tm.stats().await.leased_ids, vec![1, 2]);
}

#[tokio::test]
async fn test_duplicate_finish_releases_barrier_once() {
    let tm = TestManager::start(TIMEOUT, None);
    produce(&tm, 0).await;
    produce(&tm, 1).await;

    let job = tm.request().await;
    tm.finish(job.id).await;
    tm.finish(job.id).await;

    let stats = tm.stats().await;
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.outstanding, 1, "second finish must not release the barrier");
}

#[tokio::test]
async fn test_finish_for_unknown_id_is_ignored() {
    let tm = TestManager::start(TIMEOUT, None);
    produce(&tm, 0).await;

    tm.finish(999).await;

    let stats = tm.stats().await;
    assert_eq!(stats.outstanding, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_heartbeat_for_unknown_id_creates_no_lease() {
    let tm = TestManager::start(TIMEOUT, None);

    tm.heartbeat(42).await;

    let stats = tm.stats().await;
    assert_eq!(stats.in_flight, 0);
    assert!(!tm.leases.is_closed(), "lease manager must keep running");

    // Still serving normally afterwards
    produce(&tm, 0).await;
    let job = tm.request().await;
    assert_eq!(tm.stats().await.leased_ids, vec![job.id]);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_and_requeued() {
    let tm = TestManager::start(TIMEOUT, None);
    produce(&tm, 0).await;

    let job = tm.request().await;
    assert!(tm.queue.is_empty());

    tokio::time::sleep(TIMEOUT + Duration::from_millis(100)).await;
    let stats = tm.sweep().await;
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.outstanding, 1, "reclaim must not touch the barrier");
    assert_eq!(tm.queue.len(), 1);

    let again = tm.request().await;
    assert_eq!(again.r#type, JobType::Batch as i32);
    assert_ne!(again.id, job.id, "redispatch gets a fresh dispatch id");
    assert_eq!(again.job_data, job.job_data);
}

#[tokio::test]
async fn test_sweep_before_timeout_keeps_lease() {
    let tm = TestManager::start(TIMEOUT, None);
    produce(&tm, 0).await;

    let job = tm.request().await;
    let stats = tm.sweep().await;
    assert_eq!(stats.leased_ids, vec![job.id]);
    assert!(tm.queue.is_empty());
}

#[tokio::test]
async fn test_renewed_lease_survives_many_sweeps() {
    let tm = TestManager::start(TIMEOUT, Some(Duration::from_millis(50)));
    produce(&tm, 0).await;
    let job = tm.request().await;

    // Heartbeat at half the timeout for well over the timeout
    for _ in 0..8 {
        tokio::time::sleep(TIMEOUT / 2).await;
        tm.heartbeat(job.id).await;
    }

    let stats = tm.stats().await;
    assert_eq!(stats.leased_ids, vec![job.id]);
    assert!(tm.queue.is_empty());
}

#[tokio::test]
async fn test_finish_once_across_reclaim_releases_once() {
    let tm = TestManager::start(TIMEOUT, None);
    produce(&tm, 0).await;

    let first = tm.request().await;
    tokio::time::sleep(TIMEOUT + Duration::from_millis(100)).await;
    tm.sweep().await;

    // The original worker wakes up and finishes under its stale id
    tm.finish(first.id).await;
    assert_eq!(tm.stats().await.outstanding, 1);

    let second = tm.request().await;
    tm.finish(second.id).await;

    let stats = tm.stats().await;
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.in_flight, 0);

    // A confused third finish changes nothing
    tm.finish(second.id).await;
    assert_eq!(tm.stats().await.outstanding, 0);
}

#[tokio::test]
async fn test_on_demand_completion_leaves_barrier_alone() {
    let tm = TestManager::start(TIMEOUT, None);
    produce(&tm, 0).await;
    tm.queue
        .push(Job::on_demand(JobPayload::ParagraphIds(vec!["p1".to_string()])))
        .await
        .unwrap();

    let batch = tm.request().await;
    let on_demand = tm.request().await;
    assert_eq!(on_demand.r#type, JobType::OnDemand as i32);

    tm.finish(on_demand.id).await;
    assert_eq!(tm.stats().await.outstanding, 1);

    tm.finish(batch.id).await;
    assert_eq!(tm.stats().await.outstanding, 0);
}

#[tokio::test]
async fn test_shutdown_stops_lease_manager() {
    let tm = TestManager::start(TIMEOUT, Some(Duration::from_millis(20)));
    tm.shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(1), async {
        while !tm.leases.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("lease manager should exit on shutdown");

    assert!(tm.leases.stats().await.is_err());
}
