use engine_config::error::ProcessConfigError;
use engine_core::error::RepositoryError;
use model::job::{JobIdError, data_node::DataNodeParseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read the configuration file: {0}")]
    ConfigFileRead(#[from] std::io::Error),

    #[error("Failed to open the state store at {path}: {source}")]
    StateStore {
        path: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Process configuration error: {0}")]
    ProcessConfig(#[from] ProcessConfigError),

    #[error("Invalid job id: {0}")]
    JobId(#[from] JobIdError),

    #[error("Invalid data node line: {0}")]
    DataNode(#[from] DataNodeParseError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
