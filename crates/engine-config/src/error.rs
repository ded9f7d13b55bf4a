use engine_core::error::RepositoryError;
use model::job::JobType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessConfigError {
    #[error("Stored process configuration of {job_type} cannot be read: {source}")]
    Deserialize {
        job_type: JobType,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid process configuration document: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("Failed to serialize process configuration: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("Invalid process configuration: {0}")]
    Invalid(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}
