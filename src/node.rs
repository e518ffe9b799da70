use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::grpc::{DispatchService, GrpcServer, RunMetadata};
use crate::scheduler::{
    GatedProducer, GroupBarrier, HealthSweeper, JobQueue, LeaseHandle, LeaseManager, StateUpdate,
};
use crate::source::{build_source, MacrostratClient};
use crate::submit::{run_submit_server, SubmitState};

/// Owns the shared channels and starts every component.
pub struct Manager {
    pub config: ManagerConfig,
    pub queue: JobQueue,
    pub barrier: GroupBarrier,
    pub leases: LeaseHandle,
    lease_manager: LeaseManager,
    inbox: tokio::sync::mpsc::UnboundedReceiver<StateUpdate>,
}

impl Manager {
    /// Validate `config` and build the queue, barrier and lease manager.
    /// Nothing runs until [`run`](Self::run).
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let queue = JobQueue::new(config.queue_capacity());
        let barrier = GroupBarrier::new();
        let (lease_manager, leases, inbox) =
            LeaseManager::new(queue.clone(), barrier.clone(), config.health_timeout);

        Ok(Self {
            config,
            queue,
            barrier,
            leases,
            lease_manager,
            inbox,
        })
    }

    pub fn dispatch_service(&self) -> DispatchService {
        DispatchService::new(
            self.queue.clone(),
            self.leases.clone(),
            RunMetadata {
                run_id: self.config.run_id.clone(),
                pipeline_id: self.config.pipeline_id.clone(),
                health_timeout_secs: self.config.health_timeout_secs(),
            },
            self.config.request_timeout,
        )
    }

    /// Run all components until `shutdown` fires.
    ///
    /// 1. Initialises the job source and submission state, if configured
    /// 2. Spawns the lease manager loop and the health sweeper
    /// 3. Spawns the gated producer over that source
    /// 4. Spawns the on-demand submission server, if an address is configured
    /// 5. Runs the gRPC dispatch server (blocking)
    ///
    /// # Errors
    ///
    /// Returns an error if the job source cannot be set up or the gRPC server
    /// fails. A producer failure is logged and leaves dispatch running.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let dispatch = self.dispatch_service();
        let Manager {
            config,
            queue,
            barrier,
            leases,
            lease_manager,
            inbox,
        } = self;

        let source = match config.source {
            Some(kind) => {
                let mut source = build_source(kind, &config.source_config)?;
                source.init(&config.offset).await?;
                tracing::info!(source = %kind, offset = %config.offset, "Job source ready");
                Some(source)
            }
            None => {
                tracing::info!("No job source configured, serving on-demand jobs only");
                None
            }
        };

        let submit = match config.submit_addr {
            Some(addr) => {
                let state = SubmitState {
                    queue: queue.clone(),
                    leases: leases.clone(),
                    descriptions: Arc::new(MacrostratClient::new(
                        &config.source_config.metadata_api_url,
                    )?),
                };
                Some((addr, state))
            }
            None => None,
        };

        let manager_shutdown = shutdown.clone();
        let manager_handle = tokio::spawn(async move {
            lease_manager.run(inbox, manager_shutdown).await;
        });

        let sweeper = HealthSweeper::new(config.health_interval);
        let sweeper_leases = leases.clone();
        let sweeper_shutdown = shutdown.clone();
        tokio::spawn(async move {
            sweeper.run(sweeper_leases, sweeper_shutdown).await;
        });

        if let Some(source) = source {
            let producer = GatedProducer::new(
                source,
                queue.clone(),
                barrier.clone(),
                config.group_size,
                config.batch_size,
            );
            let producer_shutdown = shutdown.clone();
            tokio::spawn(async move {
                match producer.run(producer_shutdown).await {
                    Ok(summary) if summary.completed => {
                        tracing::info!(jobs = summary.jobs, "Producer finished");
                    }
                    Ok(summary) => {
                        tracing::info!(jobs = summary.jobs, "Producer stopped before finishing");
                    }
                    Err(e) => tracing::error!(error = %e, "Producer failed"),
                }
            });
        }

        if let Some((addr, state)) = submit {
            let submit_shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_submit_server(addr, state, submit_shutdown).await;
            });
        }

        tracing::info!(
            run_id = %config.run_id,
            pipeline_id = %config.pipeline_id,
            "Job manager running"
        );
        let served = GrpcServer::new(config.listen_addr, dispatch)
            .run(shutdown.clone())
            .await;

        shutdown.cancel();
        let _ = manager_handle.await;
        served?;
        Ok(())
    }
}
