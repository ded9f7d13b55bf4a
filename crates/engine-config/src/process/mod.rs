use crate::error::ProcessConfigError;
use std::collections::BTreeMap;

pub mod persist;
pub mod yaml;

pub const MEMORY_CHANNEL_TYPE: &str = "MEMORY";
pub const BLOCK_QUEUE_SIZE_KEY: &str = "block-queue-size";

const SUPPORTED_CHANNEL_TYPES: [&str; 1] = [MEMORY_CHANNEL_TYPE];

/// Throughput tunables of every job of one job type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessConfiguration {
    pub read: ReadConfiguration,
    pub write: WriteConfiguration,
    pub stream_channel: AlgorithmConfiguration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadConfiguration {
    /// Concurrent inventory dumpers per job item.
    pub concurrency: usize,
    pub batch_size: usize,
    /// Rows per inventory split.
    pub sharding_size: u64,
}

impl Default for ReadConfiguration {
    fn default() -> Self {
        Self {
            concurrency: 20,
            batch_size: 1000,
            sharding_size: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConfiguration {
    /// Concurrent importers per task.
    pub concurrency: usize,
    pub batch_size: usize,
}

impl Default for WriteConfiguration {
    fn default() -> Self {
        Self {
            concurrency: 20,
            batch_size: 1000,
        }
    }
}

/// Pluggable algorithm selected by type name, with free-form properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmConfiguration {
    pub kind: String,
    pub props: BTreeMap<String, String>,
}

impl Default for AlgorithmConfiguration {
    fn default() -> Self {
        Self {
            kind: MEMORY_CHANNEL_TYPE.to_string(),
            props: BTreeMap::from([(BLOCK_QUEUE_SIZE_KEY.to_string(), "2000".to_string())]),
        }
    }
}

impl AlgorithmConfiguration {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            props: BTreeMap::new(),
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Parses property `key` as a positive integer, `None` when absent.
    pub fn usize_prop(&self, key: &str) -> Result<Option<usize>, ProcessConfigError> {
        let Some(raw) = self.props.get(key) else {
            return Ok(None);
        };
        match raw.trim().parse::<usize>() {
            Ok(v) if v > 0 => Ok(Some(v)),
            _ => Err(ProcessConfigError::Invalid(format!(
                "property '{key}' of '{}' must be a positive integer, got '{raw}'",
                self.kind
            ))),
        }
    }
}

impl ProcessConfiguration {
    pub fn validate(&self) -> Result<(), ProcessConfigError> {
        let positive = [
            ("read.concurrency", self.read.concurrency as u64),
            ("read.batchSize", self.read.batch_size as u64),
            ("read.shardingSize", self.read.sharding_size),
            ("write.concurrency", self.write.concurrency as u64),
            ("write.batchSize", self.write.batch_size as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ProcessConfigError::Invalid(format!("{name} must be greater than 0")));
        }

        let kind = self.stream_channel.kind.to_ascii_uppercase();
        if !SUPPORTED_CHANNEL_TYPES.contains(&kind.as_str()) {
            return Err(ProcessConfigError::Invalid(format!(
                "unsupported stream channel type '{}'",
                self.stream_channel.kind
            )));
        }
        self.stream_channel.usize_prop(BLOCK_QUEUE_SIZE_KEY)?;

        Ok(())
    }
}
