pub mod dispatch_service;
pub mod server;

pub use dispatch_service::{DispatchService, RunMetadata};
pub use server::GrpcServer;
