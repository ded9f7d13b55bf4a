use crate::process::{ProcessConfiguration, BLOCK_QUEUE_SIZE_KEY};
use crate::error::ProcessConfigError;
use model::{job::JobDataNodeLine, position::Position};
use std::collections::BTreeMap;

/// What a dumper reads and where it resumes.
#[derive(Debug, Clone, PartialEq)]
pub struct DumperConfiguration {
    pub data_source_name: String,
    /// Actual table name to logic table name.
    pub table_name_map: BTreeMap<String, String>,
    pub position: Position,
    pub batch_size: usize,
}

impl DumperConfiguration {
    /// Dumper over every table of `data_source_name` found in `line`.
    pub fn for_data_source(
        line: &JobDataNodeLine,
        data_source_name: &str,
        position: Position,
        process: &ProcessConfiguration,
    ) -> Self {
        let table_name_map = line
            .entries
            .iter()
            .flat_map(|entry| {
                entry
                    .data_nodes
                    .iter()
                    .filter(|node| node.data_source_name == data_source_name)
                    .map(|node| (node.table_name.clone(), entry.logic_table_name.clone()))
            })
            .collect();

        Self {
            data_source_name: data_source_name.to_string(),
            table_name_map,
            position,
            batch_size: process.read.batch_size,
        }
    }

    pub fn logic_table_name(&self, actual_table: &str) -> Option<&str> {
        self.table_name_map.get(actual_table).map(String::as_str)
    }
}

/// One split of one table read by an inventory dumper.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryDumperConfiguration {
    pub dumper: DumperConfiguration,
    pub actual_table_name: String,
    pub logic_table_name: String,
    /// Integer unique key the table is split on, `None` for a single full scan.
    pub unique_key_column: Option<String>,
    pub shard_index: usize,
    /// `IntegerPrimaryKey` range of the split, or `Placeholder` for the whole table.
    pub range: Position,
}

impl InventoryDumperConfiguration {
    /// `<data source>.<actual table>#<shard index>`
    pub fn task_id(&self) -> String {
        format!(
            "{}.{}#{}",
            self.dumper.data_source_name, self.actual_table_name, self.shard_index
        )
    }
}

/// Where and how an importer writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImporterConfiguration {
    pub target_database_name: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry_times: usize,
    /// Capacity of the channel between dumper and importers, in records.
    pub channel_capacity: usize,
}

impl ImporterConfiguration {
    pub const DEFAULT_RETRY_TIMES: usize = 3;

    pub fn from_process(
        target_database_name: impl Into<String>,
        process: &ProcessConfiguration,
        retry_times: usize,
    ) -> Result<Self, ProcessConfigError> {
        process.validate()?;
        let channel_capacity = process
            .stream_channel
            .usize_prop(BLOCK_QUEUE_SIZE_KEY)?
            .unwrap_or(2000);

        Ok(Self {
            target_database_name: target_database_name.into(),
            batch_size: process.write.batch_size,
            concurrency: process.write.concurrency,
            retry_times,
            channel_capacity,
        })
    }
}
