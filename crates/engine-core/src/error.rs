use model::position::PositionParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Stored value under '{key}' is not valid UTF-8")]
    Encoding { key: String },

    #[error("Invalid key '{0}': keys are absolute '/'-separated paths")]
    InvalidKey(String),

    #[error("Repository session {0} is closed")]
    SessionClosed(u64),
}

#[derive(Error, Debug)]
pub enum BarrierError {
    #[error("Failed to watch barrier nodes: {0}")]
    Watch(#[from] RepositoryError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Job item {job_id}/{sharding_item} is already held by task '{holder}'")]
    AlreadyClaimed {
        job_id: String,
        sharding_item: u32,
        holder: String,
    },
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Stored progress under '{key}' is invalid: {source}")]
    Invalid {
        key: String,
        #[source]
        source: PositionParseError,
    },
}
