//! On-demand job submission over HTTP.
//!
//! `POST /submit_job` turns a request into at most two `on_demand` jobs and
//! pushes them straight onto the job queue, skipping the group barrier.
//! `GET /api/leases` reports what the lease manager is tracking.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::scheduler::{Job, JobPayload, JobQueue, LeaseHandle, MapDescription};
use crate::source::DescriptionLookup;

#[derive(Clone)]
pub struct SubmitState {
    pub queue: JobQueue,
    pub leases: LeaseHandle,
    pub descriptions: Arc<dyn DescriptionLookup>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MapDescriptionData {
    #[serde(default)]
    pub legend_ids: Vec<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WeaviateData {
    #[serde(default)]
    pub paragraph_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub map_description_data: MapDescriptionData,
    #[serde(default)]
    pub weaviate_data: WeaviateData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub jobs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitJobResponse {
    fn received(jobs: usize) -> Self {
        Self {
            status: Some("received".to_string()),
            jobs,
            error: None,
        }
    }

    fn failed(jobs: usize, error: &str) -> Self {
        Self {
            status: None,
            jobs,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseStatusResponse {
    pub in_flight: usize,
    pub leased_ids: Vec<u64>,
    pub outstanding: u64,
    pub queued: usize,
    pub queue_capacity: usize,
}

pub fn router(state: SubmitState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/submit_job", post(submit_job_handler))
        .route("/api/leases", get(lease_status_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_submit_server(addr: SocketAddr, state: SubmitState, shutdown: CancellationToken) {
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind submission server");
            return;
        }
    };
    tracing::info!(addr = %addr, "On-demand submission server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Submission server failed");
    }
}

/// Resolve legend ids into descriptions, keeping request order. Ids without a
/// description get empty text.
async fn map_description_job(
    lookup: &dyn DescriptionLookup,
    legend_ids: &[u64],
) -> crate::error::Result<Job> {
    let texts = lookup.fetch_descriptions(legend_ids).await?;
    let descriptions = legend_ids
        .iter()
        .map(|id| MapDescription {
            legend_id: *id,
            text: texts.get(id).cloned().unwrap_or_default(),
        })
        .collect();
    Ok(Job::on_demand(JobPayload::MapDescriptions(descriptions)))
}

async fn submit_job_handler(
    State(state): State<SubmitState>,
    Json(request): Json<SubmitJobRequest>,
) -> impl IntoResponse {
    let mut jobs = Vec::new();

    let legend_ids = &request.map_description_data.legend_ids;
    if !legend_ids.is_empty() {
        match map_description_job(state.descriptions.as_ref(), legend_ids).await {
            Ok(job) => jobs.push(job),
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch map descriptions");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(SubmitJobResponse::failed(0, "Failed to fetch map descriptions")),
                );
            }
        }
    }

    let paragraph_ids = request.weaviate_data.paragraph_ids;
    if !paragraph_ids.is_empty() {
        jobs.push(Job::on_demand(JobPayload::ParagraphIds(paragraph_ids)));
    }

    let mut queued = 0;
    for job in jobs {
        if let Err(e) = state.queue.push(job).await {
            tracing::error!(error = %e, "Failed to queue on-demand job");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(SubmitJobResponse::failed(queued, "Job queue is closed")),
            );
        }
        queued += 1;
    }

    tracing::info!(jobs = queued, "On-demand jobs queued");
    (StatusCode::OK, Json(SubmitJobResponse::received(queued)))
}

async fn lease_status_handler(State(state): State<SubmitState>) -> Response {
    match state.leases.stats().await {
        Ok(stats) => Json(LeaseStatusResponse {
            in_flight: stats.in_flight,
            leased_ids: stats.leased_ids,
            outstanding: stats.outstanding,
            queued: state.queue.len(),
            queue_capacity: state.queue.capacity(),
        })
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
