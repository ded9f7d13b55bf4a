use crate::{channel::PipelineChannel, error::DumperError, metadata::TableMetaDataLoader};
use async_trait::async_trait;
use engine_config::task::{DumperConfiguration, InventoryDumperConfiguration};
use model::position::Position;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tails the change log of one data source into a channel.
///
/// Runs until cancelled or the log ends; every record carries the log
/// position right after it, so acknowledging it is a valid resume point.
#[async_trait]
pub trait IncrementalDumper: Send {
    async fn run(
        &mut self,
        position: Position,
        channel: Arc<dyn PipelineChannel>,
        cancel: CancellationToken,
    ) -> Result<(), DumperError>;
}

/// Scans one split of one table into a channel, then pushes a finished record.
#[async_trait]
pub trait InventoryDumper: Send {
    async fn run(
        &mut self,
        range: Position,
        channel: Arc<dyn PipelineChannel>,
        cancel: CancellationToken,
    ) -> Result<(), DumperError>;
}

pub trait IncrementalDumperCreator: Send + Sync {
    fn create(
        &self,
        config: &DumperConfiguration,
        metadata: Arc<dyn TableMetaDataLoader>,
    ) -> Result<Box<dyn IncrementalDumper>, DumperError>;
}

#[async_trait]
pub trait InventoryDumperCreator: Send + Sync {
    fn create(
        &self,
        config: &InventoryDumperConfiguration,
        metadata: Arc<dyn TableMetaDataLoader>,
    ) -> Result<Box<dyn InventoryDumper>, DumperError>;

    /// Lowest and highest value of `column` in `table`, `None` for an empty table.
    async fn unique_key_range(
        &self,
        data_source_name: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<(i64, i64)>, DumperError>;
}
