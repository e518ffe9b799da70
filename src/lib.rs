pub mod config;
pub mod error;
pub mod grpc;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod source;
pub mod submit;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("job_manager");
}
