use crate::engine::ExecuteEngine;
use engine_config::task::ImporterConfiguration;
use engine_processing::{
    dumper::{IncrementalDumperCreator, InventoryDumperCreator},
    importer::ImporterConnector,
    metadata::TableMetaDataLoader,
};
use model::{
    core::identifiers::JobId,
    job::{JobDataNodeLine, JobType, MigrationJobId, PipelineJobId},
};
use std::sync::Arc;

pub mod manager;
pub mod runner;
pub mod worker;

pub const DEFAULT_UNIQUE_KEY_COLUMN: &str = "id";

/// What a pipeline job moves: one data node line per sharding item.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineJobConfiguration {
    pub job_id: JobId,
    pub job_type: JobType,
    pub job_sharding_data_nodes: Vec<JobDataNodeLine>,
    pub target_database_name: String,
    /// Integer unique key inventory tables are split on.
    pub unique_key_column: String,
    pub retry_times: usize,
}

impl PipelineJobConfiguration {
    pub fn migration(
        job_sharding_data_nodes: Vec<JobDataNodeLine>,
        target_database_name: impl Into<String>,
    ) -> Self {
        let target_database_name = target_database_name.into();
        let job_id =
            MigrationJobId::new(job_sharding_data_nodes.clone(), target_database_name.clone())
                .marshal();

        Self {
            job_id,
            job_type: JobType::Migration,
            job_sharding_data_nodes,
            target_database_name,
            unique_key_column: DEFAULT_UNIQUE_KEY_COLUMN.to_string(),
            retry_times: ImporterConfiguration::DEFAULT_RETRY_TIMES,
        }
    }

    pub fn with_unique_key_column(mut self, column: impl Into<String>) -> Self {
        self.unique_key_column = column.into();
        self
    }

    pub fn with_retry_times(mut self, retry_times: usize) -> Self {
        self.retry_times = retry_times;
        self
    }

    pub fn sharding_total_count(&self) -> usize {
        self.job_sharding_data_nodes.len()
    }
}

/// Source and target side collaborators tasks are built from.
#[derive(Clone)]
pub struct JobCollaborators {
    pub incremental_dumper_creator: Arc<dyn IncrementalDumperCreator>,
    pub inventory_dumper_creator: Arc<dyn InventoryDumperCreator>,
    pub connector: Arc<dyn ImporterConnector>,
    pub metadata: Arc<dyn TableMetaDataLoader>,
    pub engine: ExecuteEngine,
}
