use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use job_manager::config::{ManagerConfig, SourceConfig};
use job_manager::node::Manager;
use job_manager::proto::get_job_response::JobData;
use job_manager::proto::job_manager_client::JobManagerClient;
use job_manager::proto::{
    FinishJobRequest, GetJobRequest, GetJobResponse, GetMetadataRequest, JobType,
    UpdateHealthRequest,
};
use job_manager::shutdown::install_shutdown_handler;
use job_manager::source::SourceKind;

#[derive(Parser, Debug)]
#[command(name = "job-manager")]
#[command(version)]
#[command(about = "Lease-based job dispatcher with heartbeat reclaim")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the job manager
    Server(ServerArgs),

    /// Talk to a running job manager the way a worker does
    Worker {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: WorkerCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LoaderType {
    #[value(name = "test")]
    Test,
    #[value(name = "map_descrip")]
    MapDescrip,
    #[value(name = "weaviate")]
    Weaviate,
}

impl From<LoaderType> for SourceKind {
    fn from(loader: LoaderType) -> Self {
        match loader {
            LoaderType::Test => SourceKind::Fixture,
            LoaderType::MapDescrip => SourceKind::Descriptions,
            LoaderType::Weaviate => SourceKind::Paragraphs,
        }
    }
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for the gRPC dispatch service
    #[arg(long, default_value = "50051")]
    port: u16,

    /// Port for on-demand HTTP submission
    #[arg(long, default_value = "8080")]
    submit_port: u16,

    /// Disable the on-demand HTTP submission server
    #[arg(long)]
    no_submit: bool,

    /// Batches per group; the next group waits until all earlier jobs finish
    #[arg(long, env = "GROUP_SIZE", default_value = "10")]
    group_size: usize,

    /// Items requested from the job source per batch
    #[arg(long, env = "MINI_BATCH_SIZE", default_value = "10")]
    batch_size: usize,

    /// Job queue capacity (defaults to the batch size)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Seconds between lease sweeps
    #[arg(long, env = "HEALTH_INTERVAL")]
    health_interval: u64,

    /// Seconds without a heartbeat before a job is requeued
    #[arg(long, env = "HEALTH_TIMEOUT")]
    health_timeout: u64,

    /// Resume offset for the job source
    #[arg(long, env = "OFFSET", default_value = "")]
    offset: String,

    #[arg(long, env = "PIPELINE_ID", default_value = "")]
    pipeline_id: String,

    /// Run id prefix; the start time is appended
    #[arg(long, env = "RUN_ID", default_value = "")]
    run_id: String,

    /// Job source feeding the gated producer
    #[arg(long, value_enum, default_value = "test")]
    loader_type: LoaderType,

    /// Enable the gated producer
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    set_loader: bool,

    /// Map metadata API base URL
    #[arg(long, default_value = "https://dev2.macrostrat.org/api/pg")]
    metadata_api_url: String,

    #[arg(long, env = "WEAVIATE_HOST", default_value = "localhost")]
    weaviate_host: String,

    #[arg(long, env = "WEAVIATE_PORT", default_value = "8080")]
    weaviate_port: u16,

    #[arg(long, default_value = "http")]
    weaviate_scheme: String,

    #[arg(long, env = "WEAVIATE_API_KEY")]
    weaviate_api_key: Option<String>,
}

impl ServerArgs {
    fn into_config(self) -> ManagerConfig {
        let run_id = format!(
            "{}{}",
            self.run_id,
            chrono::Local::now().format("_%Y-%m-%d_%H:%M:%S")
        );

        ManagerConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
            submit_addr: (!self.no_submit)
                .then(|| SocketAddr::from(([0, 0, 0, 0], self.submit_port))),
            group_size: self.group_size,
            batch_size: self.batch_size,
            queue_capacity: self.queue_capacity,
            health_interval: Duration::from_secs(self.health_interval),
            health_timeout: Duration::from_secs(self.health_timeout),
            request_timeout: Duration::from_secs(1),
            offset: self.offset,
            pipeline_id: self.pipeline_id,
            run_id,
            source: self.set_loader.then(|| self.loader_type.into()),
            source_config: SourceConfig {
                metadata_api_url: self.metadata_api_url,
                index_host: format!("{}:{}", self.weaviate_host, self.weaviate_port),
                index_scheme: self.weaviate_scheme,
                index_api_key: self.weaviate_api_key,
            },
        }
    }
}

// =============================================================================
// Worker Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Job manager address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum WorkerCommands {
    /// Lease the next job
    Get,
    /// Acknowledge a finished job
    Finish { id: u64 },
    /// Renew the lease on a job
    Health { id: u64 },
    /// Show run metadata
    Metadata,
    /// Pull and finish jobs in a loop, heartbeating while each one "runs"
    Work {
        /// Simulated time spent on each job, in milliseconds
        #[arg(long, default_value = "1000")]
        work_ms: u64,

        /// Heartbeat interval in milliseconds (defaults to half the health timeout)
        #[arg(long)]
        heartbeat_ms: Option<u64>,

        /// Stop after this many jobs
        #[arg(long)]
        max_jobs: Option<u64>,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobOutput {
    id: u64,
    r#type: String,
    items: usize,
}

#[derive(Serialize)]
struct MetadataOutput {
    run_id: String,
    pipeline_id: String,
    health_timeout: u32,
}

fn job_output(job: &GetJobResponse) -> JobOutput {
    let job_type = JobType::try_from(job.r#type).unwrap_or(JobType::Wait);
    let items = match &job.job_data {
        Some(JobData::TestData(data)) => data.paragraphs.len(),
        Some(JobData::MapDescriptionData(data)) => data.descriptions.len(),
        Some(JobData::ParagraphData(data)) => data.paragraph_ids.len(),
        None => 0,
    };
    JobOutput {
        id: job.id,
        r#type: job_type.as_str_name().to_string(),
        items,
    }
}

fn print_output<T: Serialize>(value: &T, format: &OutputFormat, table: impl FnOnce(&T)) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to encode output: {}", e),
        },
        OutputFormat::Table => table(value),
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = args.into_config();
    tracing::info!(
        run_id = %config.run_id,
        group_size = config.group_size,
        batch_size = config.batch_size,
        health_interval_s = config.health_interval.as_secs(),
        health_timeout_s = config.health_timeout.as_secs(),
        "Starting job manager"
    );

    let manager = Manager::new(config)?;
    let shutdown = install_shutdown_handler();
    manager.run(shutdown).await?;

    tracing::info!("Job manager stopped");
    Ok(())
}

async fn run_worker(
    client: &mut JobManagerClient<Channel>,
    work: Duration,
    heartbeat: Option<Duration>,
    max_jobs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let heartbeat = match heartbeat {
        Some(interval) => interval,
        None => {
            let metadata = client.get_metadata(GetMetadataRequest {}).await?.into_inner();
            Duration::from_secs(u64::from(metadata.health_timeout).max(1)) / 2
        }
    };

    let mut finished = 0u64;
    while max_jobs.map_or(true, |max| finished < max) {
        let job = client.get_job(GetJobRequest {}).await?.into_inner();
        if job.r#type == JobType::Wait as i32 {
            continue;
        }
        let output = job_output(&job);
        println!("Working on job {} ({} items)", output.id, output.items);

        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        let done = tokio::time::sleep(work);
        tokio::pin!(done);
        loop {
            tokio::select! {
                _ = &mut done => break,
                _ = ticker.tick() => {
                    client.update_health(UpdateHealthRequest { id: job.id }).await?;
                }
            }
        }

        client.finish_job(FinishJobRequest { id: job.id }).await?;
        finished += 1;
    }

    println!("Finished {} jobs", finished);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Worker { client, command } => {
            let mut grpc_client = JobManagerClient::connect(client.addr.clone()).await?;

            match command {
                WorkerCommands::Get => {
                    let job = grpc_client.get_job(GetJobRequest {}).await?.into_inner();
                    print_output(&job_output(&job), &client.output, |job| {
                        println!("Job ID:  {}", job.id);
                        println!("Type:    {}", job.r#type);
                        println!("Items:   {}", job.items);
                    });
                }
                WorkerCommands::Finish { id } => {
                    grpc_client.finish_job(FinishJobRequest { id }).await?;
                    println!("Finished job {}", id);
                }
                WorkerCommands::Health { id } => {
                    grpc_client.update_health(UpdateHealthRequest { id }).await?;
                    println!("Renewed lease on job {}", id);
                }
                WorkerCommands::Metadata => {
                    let meta = grpc_client
                        .get_metadata(GetMetadataRequest {})
                        .await?
                        .into_inner();
                    let output = MetadataOutput {
                        run_id: meta.run_id,
                        pipeline_id: meta.pipeline_id,
                        health_timeout: meta.health_timeout,
                    };
                    print_output(&output, &client.output, |meta| {
                        println!("Run ID:          {}", meta.run_id);
                        println!("Pipeline ID:     {}", meta.pipeline_id);
                        println!("Health timeout:  {}s", meta.health_timeout);
                    });
                }
                WorkerCommands::Work {
                    work_ms,
                    heartbeat_ms,
                    max_jobs,
                } => {
                    run_worker(
                        &mut grpc_client,
                        Duration::from_millis(work_ms),
                        heartbeat_ms.map(Duration::from_millis),
                        max_jobs,
                    )
                    .await?;
                }
            }
        }
    }

    Ok(())
}
