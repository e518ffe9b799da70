use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ManagerError, Result};
use crate::source::SourceKind;

/// Endpoints and credentials used by the HTTP-backed job sources.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL of the map metadata API (descriptions live under `/legend`).
    pub metadata_api_url: String,
    /// `host:port` of the paragraph search index.
    pub index_host: String,
    /// URL scheme for the search index, usually "http".
    pub index_scheme: String,
    /// API key sent as a bearer token to the search index.
    pub index_api_key: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            metadata_api_url: "https://dev2.macrostrat.org/api/pg".to_string(),
            index_host: "localhost:8080".to_string(),
            index_scheme: "http".to_string(),
            index_api_key: None,
        }
    }
}

/// Process-wide configuration, built once at startup and handed to
/// [`Manager::new`](crate::node::Manager::new).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// gRPC dispatch address workers connect to
    pub listen_addr: SocketAddr,
    /// On-demand submission HTTP address. `None` disables the HTTP surface.
    pub submit_addr: Option<SocketAddr>,
    /// Number of batches produced before waiting on the group barrier
    pub group_size: usize,
    /// Items requested from the job source per batch
    pub batch_size: usize,
    /// Job queue capacity. `None` sizes the queue by `batch_size`.
    pub queue_capacity: Option<usize>,
    /// How often the sweeper asks the lease manager to reclaim expired leases
    pub health_interval: Duration,
    /// A lease without a heartbeat for longer than this is reclaimed
    pub health_timeout: Duration,
    /// How long `GetJob` waits on an empty queue before answering with a wait job
    pub request_timeout: Duration,
    /// Resume position handed to the job source
    pub offset: String,
    pub pipeline_id: String,
    pub run_id: String,
    /// Job source feeding the gated producer. `None` runs on-demand only.
    pub source: Option<SourceKind>,
    pub source_config: SourceConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:50051"
                .parse()
                .expect("default listen address is valid"),
            submit_addr: None,
            group_size: 10,
            batch_size: 10,
            queue_capacity: None,
            health_interval: Duration::from_secs(10),
            health_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(1),
            offset: String::new(),
            pipeline_id: String::new(),
            run_id: String::new(),
            source: Some(SourceKind::Fixture),
            source_config: SourceConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_health(mut self, interval: Duration, timeout: Duration) -> Self {
        self.health_interval = interval;
        self.health_timeout = timeout;
        self
    }

    pub fn with_groups(mut self, group_size: usize, batch_size: usize) -> Self {
        self.group_size = group_size;
        self.batch_size = batch_size;
        self
    }

    /// Effective job queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.batch_size)
    }

    /// Health timeout in whole seconds, as reported by `GetMetadata`.
    pub fn health_timeout_secs(&self) -> u32 {
        u32::try_from(self.health_timeout.as_secs()).unwrap_or(u32::MAX)
    }

    /// Reject settings that would break the lease or production loops.
    ///
    /// A zero health timeout would expire every lease on the first sweep, and a
    /// zero interval would spin the sweeper.
    pub fn validate(&self) -> Result<()> {
        if self.health_interval.is_zero() {
            return Err(ManagerError::InvalidConfig(
                "health interval must be greater than zero".to_string(),
            ));
        }
        if self.health_timeout.is_zero() {
            return Err(ManagerError::InvalidConfig(
                "health timeout must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ManagerError::InvalidConfig(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity() == 0 {
            return Err(ManagerError::InvalidConfig(
                "job queue capacity must be greater than zero".to_string(),
            ));
        }
        if self.source.is_some() && (self.group_size == 0 || self.batch_size == 0) {
            return Err(ManagerError::InvalidConfig(
                "group size and batch size must be greater than zero".to_string(),
            ));
        }
        if self.health_timeout < self.health_interval {
            tracing::warn!(
                interval_ms = self.health_interval.as_millis() as u64,
                timeout_ms = self.health_timeout.as_millis() as u64,
                "Health timeout is shorter than the sweep interval"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ManagerConfig {
        ManagerConfig::default().with_health(Duration::from_secs(1), Duration::from_secs(2))
    }

    #[test]
    fn manager_config_default() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:50051");
        assert!(cfg.submit_addr.is_none());
        assert_eq!(cfg.request_timeout, Duration::from_secs(1));
        assert_eq!(cfg.source, Some(SourceKind::Fixture));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn queue_capacity_defaults_to_batch_size() {
        let cfg = valid().with_groups(4, 7);
        assert_eq!(cfg.queue_capacity(), 7);

        let cfg = ManagerConfig {
            queue_capacity: Some(3),
            ..cfg
        };
        assert_eq!(cfg.queue_capacity(), 3);
    }

    #[test]
    fn zero_health_interval_rejected() {
        let cfg = valid().with_health(Duration::ZERO, Duration::from_secs(2));
        assert!(matches!(cfg.validate(), Err(ManagerError::InvalidConfig(_))));
    }

    #[test]
    fn zero_health_timeout_rejected() {
        let cfg = valid().with_health(Duration::from_secs(1), Duration::ZERO);
        assert!(matches!(cfg.validate(), Err(ManagerError::InvalidConfig(_))));
    }

    #[test]
    fn zero_group_size_rejected_only_with_source() {
        let cfg = valid().with_groups(0, 5);
        assert!(cfg.validate().is_err());

        let cfg = ManagerConfig {
            source: None,
            queue_capacity: Some(5),
            ..cfg
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let cfg = ManagerConfig {
            queue_capacity: Some(0),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn health_timeout_reported_in_seconds() {
        let cfg = valid().with_health(Duration::from_secs(1), Duration::from_millis(2500));
        assert_eq!(cfg.health_timeout_secs(), 2);
    }
}
