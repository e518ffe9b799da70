pub mod barrier;
pub mod job;
pub mod lease;
pub mod manager;
pub mod producer;
pub mod queue;
pub mod sweeper;

pub use barrier::GroupBarrier;
pub use job::{Job, JobKind, JobPayload, MapDescription};
pub use lease::{Lease, LeaseTable};
pub use manager::{LeaseHandle, LeaseManager, LeaseStats, StateUpdate};
pub use producer::{GatedProducer, GroupReport, ProducerSummary};
pub use queue::JobQueue;
pub use sweeper::HealthSweeper;
