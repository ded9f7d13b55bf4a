use super::{
    AckCallback, PipelineChannel, memory::MemoryPipelineChannel,
    multiplex::MultiplexPipelineChannel,
};
use crate::error::ChannelError;
use engine_config::process::{AlgorithmConfiguration, BLOCK_QUEUE_SIZE_KEY, MEMORY_CHANNEL_TYPE};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_BLOCK_QUEUE_SIZE: usize = 2000;

/// Creates the channel of each task from the stream channel configuration.
#[derive(Debug, Clone)]
pub enum ChannelFactory {
    Memory { block_queue_size: usize },
}

impl ChannelFactory {
    pub fn from_config(config: &AlgorithmConfiguration) -> Result<Self, ChannelError> {
        if !config.kind.eq_ignore_ascii_case(MEMORY_CHANNEL_TYPE) {
            return Err(ChannelError::Unsupported(config.kind.clone()));
        }

        let block_queue_size = config
            .usize_prop(BLOCK_QUEUE_SIZE_KEY)
            .map_err(|e| ChannelError::InvalidConfig(e.to_string()))?
            .unwrap_or(DEFAULT_BLOCK_QUEUE_SIZE);

        Ok(ChannelFactory::Memory { block_queue_size })
    }

    /// A plain channel for one consumer, a multiplex of `consumers` lanes otherwise.
    pub fn create(&self, consumers: usize, ack_callback: Option<AckCallback>) -> Arc<dyn PipelineChannel> {
        match self {
            ChannelFactory::Memory { block_queue_size } => {
                debug!(consumers, block_queue_size, "Creating memory pipeline channel");
                if consumers <= 1 {
                    Arc::new(MemoryPipelineChannel::new(*block_queue_size, ack_callback))
                } else {
                    Arc::new(MultiplexPipelineChannel::new(
                        consumers,
                        *block_queue_size,
                        ack_callback,
                    ))
                }
            }
        }
    }
}

impl Default for ChannelFactory {
    fn default() -> Self {
        ChannelFactory::Memory {
            block_queue_size: DEFAULT_BLOCK_QUEUE_SIZE,
        }
    }
}
