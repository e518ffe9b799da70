use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::dispatch_service::DispatchService;
use crate::proto::job_manager_server::JobManagerServer;

pub struct GrpcServer {
    addr: SocketAddr,
    service: DispatchService,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, service: DispatchService) -> Self {
        Self { addr, service }
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(JobManagerServer::new(self.service))
            .serve_with_shutdown(self.addr, async move { shutdown.cancelled().await })
            .await
    }
}
