use engine_config::error::ProcessConfigError;
use engine_core::error::{BarrierError, ContextError, ProgressError};
use engine_processing::error::{ChannelError, DumperError, ImporterError};
use model::job::JobIdError;
use thiserror::Error;

/// Failure of one pipeline task, surfaced through its completion handles.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{0}' is already started")]
    AlreadyStarted(String),

    #[error("Task '{0}' was stopped")]
    Stopped(String),

    #[error("Job item slot unavailable: {0}")]
    Claim(#[from] ContextError),

    #[error("Dumper of task '{task_id}' failed: {source}")]
    Dumper {
        task_id: String,
        #[source]
        source: DumperError,
    },

    #[error("Importer of task '{task_id}' failed: {source}")]
    Importer {
        task_id: String,
        #[source]
        source: ImporterError,
    },

    /// A worker panicked or was aborted.
    #[error("Worker did not complete: {0}")]
    Join(String),
}

/// Errors of job items and of job-level coordination.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Process configuration error: {0}")]
    ProcessConfig(#[from] ProcessConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Dumper error: {0}")]
    Dumper(#[from] DumperError),

    #[error("Barrier error: {0}")]
    Barrier(#[from] BarrierError),

    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("Job id error: {0}")]
    JobId(#[from] JobIdError),

    #[error("Job '{job_id}' has no sharding item {sharding_item} ({total} items)")]
    NoSuchShardingItem {
        job_id: String,
        sharding_item: u32,
        total: usize,
    },

    #[error("Sharding item {sharding_item} of job '{job_id}' spans data sources {data_sources:?}")]
    MixedDataSources {
        job_id: String,
        sharding_item: u32,
        data_sources: Vec<String>,
    },

    #[error("Sharding item {sharding_item} of job '{job_id}' is already running")]
    AlreadyRunning { job_id: String, sharding_item: u32 },

    #[error("Job '{job_id}' did not pass barrier '{path}' within {timeout_ms} ms")]
    BarrierTimeout {
        job_id: String,
        path: String,
        timeout_ms: u64,
    },

    #[error("Job item runner did not complete: {0}")]
    Join(String),
}
