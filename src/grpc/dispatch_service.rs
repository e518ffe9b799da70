use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tonic::{Request, Response, Status};

use crate::proto::get_job_response::JobData;
use crate::proto::job_manager_server::JobManager;
use crate::proto::{
    FinishJobRequest, FinishJobResponse, GetJobRequest, GetJobResponse, GetMetadataRequest,
    GetMetadataResponse, JobType as ProtoJobType, MapDescription as ProtoMapDescription,
    MapDescriptionJob, ParagraphJob, TestJob, UpdateHealthRequest, UpdateHealthResponse,
};
use crate::scheduler::{Job, JobKind, JobPayload, JobQueue, LeaseHandle};

/// Static identity reported by `GetMetadata`.
#[derive(Debug, Clone, Default)]
pub struct RunMetadata {
    pub run_id: String,
    pub pipeline_id: String,
    pub health_timeout_secs: u32,
}

/// Convert a job into its wire form.
pub fn job_to_proto(job: &Job) -> GetJobResponse {
    let job_type = match job.kind {
        JobKind::Wait => ProtoJobType::Wait,
        JobKind::Batch => ProtoJobType::Batch,
        JobKind::OnDemand => ProtoJobType::OnDemand,
    };
    let job_data = job.payload.as_ref().map(|payload| match payload {
        JobPayload::Paragraphs(paragraphs) => JobData::TestData(TestJob {
            paragraphs: paragraphs.clone(),
        }),
        JobPayload::MapDescriptions(descriptions) => {
            JobData::MapDescriptionData(MapDescriptionJob {
                descriptions: descriptions
                    .iter()
                    .map(|d| ProtoMapDescription {
                        legend_id: d.legend_id,
                        text: d.text.clone(),
                    })
                    .collect(),
            })
        }
        JobPayload::ParagraphIds(ids) => JobData::ParagraphData(ParagraphJob {
            paragraph_ids: ids.clone(),
        }),
    });

    GetJobResponse {
        id: job.id,
        r#type: job_type as i32,
        job_data,
    }
}

/// Worker-facing RPC surface. Translates calls into job queue pops and lease
/// manager messages; never touches the lease table itself.
pub struct DispatchService {
    queue: JobQueue,
    leases: LeaseHandle,
    metadata: RunMetadata,
    request_timeout: Duration,
    /// Last dispatch id handed out
    dispatched: AtomicU64,
}

impl DispatchService {
    pub fn new(
        queue: JobQueue,
        leases: LeaseHandle,
        metadata: RunMetadata,
        request_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            leases,
            metadata,
            request_timeout,
            dispatched: AtomicU64::new(0),
        }
    }

    fn next_dispatch_id(&self) -> u64 {
        self.dispatched.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[tonic::async_trait]
impl JobManager for DispatchService {
    async fn get_job(
        &self,
        _request: Request<GetJobRequest>,
    ) -> Result<Response<GetJobResponse>, Status> {
        let Some(mut job) = self.queue.pop_timeout(self.request_timeout).await else {
            return Ok(Response::new(job_to_proto(&Job::wait())));
        };

        job.id = self.next_dispatch_id();
        let response = job_to_proto(&job);
        let (job_id, kind) = (job.id, job.kind);

        if let Err(e) = self.leases.job_requested(job.clone(), Instant::now()) {
            tracing::error!(job_id, error = %e, "Cannot lease job");
            if self.queue.try_push(job).is_err() {
                tracing::error!(job_id, "Job queue full, unleased job dropped");
            }
            return Err(Status::unavailable("Lease manager is not running"));
        }

        tracing::info!(job_id, kind = %kind, "Job dispatched");
        Ok(Response::new(response))
    }

    async fn finish_job(
        &self,
        request: Request<FinishJobRequest>,
    ) -> Result<Response<FinishJobResponse>, Status> {
        let job_id = request.into_inner().id;
        self.leases
            .job_finished(job_id)
            .map_err(|_| Status::unavailable("Lease manager is not running"))?;

        tracing::info!(job_id, "Job finished");
        Ok(Response::new(FinishJobResponse {}))
    }

    async fn update_health(
        &self,
        request: Request<UpdateHealthRequest>,
    ) -> Result<Response<UpdateHealthResponse>, Status> {
        let job_id = request.into_inner().id;
        self.leases
            .update_health(job_id)
            .map_err(|_| Status::unavailable("Lease manager is not running"))?;

        tracing::debug!(job_id, "Health update");
        Ok(Response::new(UpdateHealthResponse {}))
    }

    async fn get_metadata(
        &self,
        _request: Request<GetMetadataRequest>,
    ) -> Result<Response<GetMetadataResponse>, Status> {
        Ok(Response::new(GetMetadataResponse {
            run_id: self.metadata.run_id.clone(),
            pipeline_id: self.metadata.pipeline_id.clone(),
            health_timeout: self.metadata.health_timeout_secs,
        }))
    }
}
