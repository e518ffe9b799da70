use std::sync::Arc;

use tokio::sync::watch;

/// Count of produced batch jobs that have not been finished yet.
///
/// The producer calls [`add`](Self::add) once per job and the lease manager
/// calls [`done`](Self::done) once per completed batch lease. Reclaiming a job
/// leaves the count alone.
#[derive(Debug, Clone)]
pub struct GroupBarrier {
    outstanding: Arc<watch::Sender<u64>>,
}

impl Default for GroupBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupBarrier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            outstanding: Arc::new(tx),
        }
    }

    pub fn add(&self) {
        self.outstanding.send_modify(|count| *count += 1);
    }

    /// Release one outstanding job. Returns false, leaving the count at zero,
    /// if nothing was outstanding.
    pub fn done(&self) -> bool {
        let released = self.outstanding.send_if_modified(|count| {
            if *count == 0 {
                return false;
            }
            *count -= 1;
            true
        });
        if !released {
            tracing::error!("Group barrier released with no outstanding jobs");
        }
        released
    }

    pub fn outstanding(&self) -> u64 {
        *self.outstanding.borrow()
    }

    /// Wait until every job added so far has been released.
    pub async fn wait(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_when_empty() {
        let barrier = GroupBarrier::new();
        tokio::time::timeout(Duration::from_millis(50), barrier.wait())
            .await
            .expect("empty barrier should not block");
    }

    #[test]
    fn done_never_goes_below_zero() {
        let barrier = GroupBarrier::new();
        barrier.add();
        assert!(barrier.done());
        assert!(!barrier.done());
        assert_eq!(barrier.outstanding(), 0);
    }

    #[tokio::test]
    async fn wait_blocks_until_all_released() {
        let barrier = GroupBarrier::new();
        barrier.add();
        barrier.add();

        let waiter = barrier.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        barrier.done();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());

        barrier.done();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter should wake once the count hits zero")
            .unwrap();
    }
}
