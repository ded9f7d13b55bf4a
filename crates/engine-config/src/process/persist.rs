use super::{ProcessConfiguration, yaml::YamlProcessConfiguration};
use crate::error::ProcessConfigError;
use engine_core::{node_path, repository::PersistRepository};
use model::job::JobType;
use std::sync::Arc;
use tracing::{debug, info};

/// Stores one process configuration per job type in the coordination store.
#[derive(Clone)]
pub struct ProcessConfigurationPersistService {
    repository: Arc<dyn PersistRepository>,
}

impl ProcessConfigurationPersistService {
    pub fn new(repository: Arc<dyn PersistRepository>) -> Self {
        Self { repository }
    }

    /// Validates and stores `config` as canonical YAML.
    pub async fn persist(
        &self,
        job_type: JobType,
        config: &ProcessConfiguration,
    ) -> Result<(), ProcessConfigError> {
        config.validate()?;
        let text = config.to_yaml()?;
        self.repository
            .persist(&node_path::process_config_path(job_type), &text)
            .await?;
        info!(job_type = %job_type, "Persisted process configuration");
        Ok(())
    }

    /// Stored configuration with missing fields defaulted, or the default
    /// configuration when none was stored.
    pub async fn load(&self, job_type: JobType) -> Result<ProcessConfiguration, ProcessConfigError> {
        let path = node_path::process_config_path(job_type);
        let Some(text) = self.repository.get(&path).await? else {
            debug!(job_type = %job_type, "No stored process configuration, using defaults");
            return Ok(ProcessConfiguration::default());
        };

        let doc = if text.trim().is_empty() {
            YamlProcessConfiguration::default()
        } else {
            serde_yaml::from_str::<YamlProcessConfiguration>(&text)
                .map_err(|source| ProcessConfigError::Deserialize { job_type, source })?
        };
        doc.fill_in_defaults()
    }

    /// Merges a partial YAML document over the current configuration and stores the result.
    pub async fn update(
        &self,
        job_type: JobType,
        partial_yaml: &str,
    ) -> Result<ProcessConfiguration, ProcessConfigError> {
        let current = self.load(job_type).await?;
        let merged = YamlProcessConfiguration::from_yaml(partial_yaml)?.fill_in(&current)?;
        self.persist(job_type, &merged).await?;
        Ok(merged)
    }

    /// Drops the stored configuration; later loads return defaults.
    pub async fn reset(&self, job_type: JobType) -> Result<(), ProcessConfigError> {
        self.repository
            .delete(&node_path::process_config_path(job_type))
            .await?;
        info!(job_type = %job_type, "Reset process configuration");
        Ok(())
    }
}
