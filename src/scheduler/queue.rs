use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::error::{ManagerError, Result};
use crate::scheduler::job::Job;

/// Bounded FIFO handoff between job producers and the dispatch boundary.
///
/// Cloning yields another handle to the same queue. Any number of handles may
/// push and pop concurrently; `push` waits while the queue is full, which is
/// the only backpressure between production and dispatch.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    capacity: usize,
}

impl JobQueue {
    /// Panics if `capacity` is zero; [`ManagerConfig::validate`](crate::config::ManagerConfig::validate)
    /// rejects that before construction.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            capacity,
        }
    }

    /// Append a job, waiting for space if the queue is full.
    pub async fn push(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| ManagerError::QueueClosed)
    }

    /// Append a job only if there is room right now.
    pub fn try_push(&self, job: Job) -> std::result::Result<(), Job> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
        })
    }

    /// Take the oldest job, waiting at most `wait` for one to arrive.
    ///
    /// Concurrent callers are served one at a time; time spent waiting for
    /// another caller counts against `wait`.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<Job> {
        tokio::time::timeout(wait, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Number of jobs currently buffered
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::JobPayload;

    fn job(id: u64) -> Job {
        Job::batch(id, JobPayload::Paragraphs(vec![format!("data{}", id)]))
    }

    #[tokio::test]
    async fn pops_in_push_order() {
        let queue = JobQueue::new(4);
        queue.push(job(1)).await.unwrap();
        queue.push(job(2)).await.unwrap();
        assert_eq!(queue.len(), 2);

        let wait = Duration::from_millis(50);
        assert_eq!(queue.pop_timeout(wait).await.unwrap().id, 1);
        assert_eq!(queue.pop_timeout(wait).await.unwrap().id, 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_times_out_when_empty() {
        let queue = JobQueue::new(1);
        let start = std::time::Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(50)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn try_push_rejects_when_full() {
        let queue = JobQueue::new(1);
        assert!(queue.try_push(job(1)).is_ok());
        assert!(queue.is_full());
        let rejected = queue.try_push(job(2)).unwrap_err();
        assert_eq!(rejected.id, 2);
    }

    #[tokio::test]
    async fn push_waits_for_space() {
        let queue = JobQueue::new(1);
        queue.push(job(1)).await.unwrap();

        let producer = queue.clone();
        let handle = tokio::spawn(async move { producer.push(job(2)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "push should block on a full queue");

        let wait = Duration::from_millis(50);
        assert_eq!(queue.pop_timeout(wait).await.unwrap().id, 1);
        handle.await.unwrap().unwrap();
        assert_eq!(queue.pop_timeout(wait).await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn concurrent_consumers_each_get_one_job() {
        let queue = JobQueue::new(8);
        for id in 0..4 {
            queue.push(job(id)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                q.pop_timeout(Duration::from_millis(200)).await
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap().id);
        }
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }
}
