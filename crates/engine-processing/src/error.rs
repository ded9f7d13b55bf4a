use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,

    #[error("Channel has no lane {lane} (lanes: {lanes})")]
    NoSuchLane { lane: usize, lanes: usize },

    #[error("Unsupported stream channel type '{0}'")]
    Unsupported(String),

    #[error("Invalid channel configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug)]
pub enum MetaDataError {
    #[error("Failed to load metadata of table '{table}': {message}")]
    Load { table: String, message: String },
}

#[derive(Error, Debug)]
pub enum DumperError {
    #[error("Failed to read from data source '{data_source}': {message}")]
    Source { data_source: String, message: String },

    #[error("Unsupported position {position} for data source '{data_source}'")]
    UnsupportedPosition { data_source: String, position: String },

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Metadata error: {0}")]
    MetaData(#[from] MetaDataError),
}

#[derive(Error, Debug)]
pub enum ImporterError {
    #[error("Failed to write batch '{batch_id}' to table '{table}': {message}")]
    Write {
        batch_id: String,
        table: String,
        message: String,
        retryable: bool,
    },

    #[error("Giving up on batch '{batch_id}' of table '{table}' after {attempts} attempts: {message}")]
    RetriesExhausted {
        batch_id: String,
        table: String,
        attempts: usize,
        message: String,
    },

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Metadata error: {0}")]
    MetaData(#[from] MetaDataError),
}

impl ImporterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ImporterError::Write { retryable: true, .. })
    }
}
