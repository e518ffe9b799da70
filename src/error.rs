use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Lease manager has stopped")]
    LeaseManagerStopped,

    #[error("Job source error: {0}")]
    Source(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ManagerError>;
