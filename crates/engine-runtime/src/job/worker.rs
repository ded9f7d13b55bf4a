use super::{JobCollaborators, PipelineJobConfiguration, runner::JobItemRunner};
use crate::error::JobError;
use dashmap::{DashMap, mapref::entry::Entry};
use engine_config::process::persist::ProcessConfigurationPersistService;
use engine_core::{
    barrier::DistributedBarrier,
    context::{
        item::{JobItemContext, JobStatus},
        progress::JobItemProgressPersistService,
    },
    node_path,
};
use model::core::identifiers::JobId;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct RunningItem {
    runner: Arc<JobItemRunner>,
    handle: JoinHandle<Result<(), JobError>>,
    persister: JoinHandle<()>,
    persister_cancel: CancellationToken,
}

/// Runs the job items assigned to this process and announces each start
/// and stop on the job's enable and disable barriers.
///
/// Item progress is stored as it is acknowledged and loaded again when the
/// item restarts, on this process or any other.
pub struct PipelineJobWorker {
    barrier: Arc<DistributedBarrier>,
    process_configs: ProcessConfigurationPersistService,
    progress: JobItemProgressPersistService,
    collaborators: JobCollaborators,
    items: DashMap<(JobId, u32), RunningItem>,
}

impl PipelineJobWorker {
    pub fn new(
        barrier: Arc<DistributedBarrier>,
        process_configs: ProcessConfigurationPersistService,
        progress: JobItemProgressPersistService,
        collaborators: JobCollaborators,
    ) -> Self {
        Self {
            barrier,
            process_configs,
            progress,
            collaborators,
            items: DashMap::new(),
        }
    }

    /// Restores the stored progress of `sharding_item` of `job`, prepares and
    /// spawns it, then signals the enable barrier.
    pub async fn start_item(
        &self,
        job: &PipelineJobConfiguration,
        sharding_item: u32,
    ) -> Result<Arc<JobItemContext>, JobError> {
        let key = (job.job_id.clone(), sharding_item);
        if self.items.contains_key(&key) {
            return Err(JobError::AlreadyRunning {
                job_id: job.job_id.to_string(),
                sharding_item,
            });
        }

        let process = self.process_configs.load(job.job_type).await?;
        let context = Arc::new(JobItemContext::new(job.job_id.clone(), sharding_item));
        self.progress.load_into(&context).await?;
        let runner = Arc::new(
            JobItemRunner::prepare(job, sharding_item, &process, &self.collaborators, context.clone())
                .await?,
        );

        match self.items.entry(key) {
            Entry::Occupied(_) => {
                return Err(JobError::AlreadyRunning {
                    job_id: job.job_id.to_string(),
                    sharding_item,
                });
            }
            Entry::Vacant(vacant) => {
                let persister_cancel = CancellationToken::new();
                let persister = tokio::spawn({
                    let progress = self.progress.clone();
                    let context = context.clone();
                    let cancel = persister_cancel.clone();
                    async move { progress.persist_on_change(context, cancel).await }
                });
                let handle = tokio::spawn({
                    let runner = runner.clone();
                    async move { runner.run().await }
                });
                vacant.insert(RunningItem {
                    runner,
                    handle,
                    persister,
                    persister_cancel,
                });
            }
        }

        info!(job_id = %job.job_id, sharding_item, "Job item started");
        self.barrier
            .persist_ephemeral_children_node(
                &node_path::job_barrier_enable_path(job.job_id.as_str()),
                sharding_item,
            )
            .await;
        Ok(context)
    }

    /// Stops `sharding_item` of `job_id` if it runs here, waits for its tasks,
    /// flushes its progress and signals the disable barrier. Returns the
    /// final status of the item.
    pub async fn stop_item(&self, job_id: &JobId, sharding_item: u32) -> Option<JobStatus> {
        let status = match self.items.remove(&(job_id.clone(), sharding_item)) {
            Some((_, item)) => {
                item.runner.stop();
                match item.handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(job_id = %job_id, sharding_item, error = %e, "Job item ended with error"),
                    Err(e) => warn!(job_id = %job_id, sharding_item, error = %e, "Job item runner did not complete"),
                }
                item.persister_cancel.cancel();
                if let Err(e) = item.persister.await {
                    warn!(job_id = %job_id, sharding_item, error = %e, "Job item progress persister did not complete");
                }
                info!(job_id = %job_id, sharding_item, "Job item stopped");
                Some(item.runner.context().status())
            }
            None => None,
        };

        self.barrier
            .persist_ephemeral_children_node(
                &node_path::job_barrier_disable_path(job_id.as_str()),
                sharding_item,
            )
            .await;
        status
    }

    pub fn item_context(&self, job_id: &JobId, sharding_item: u32) -> Option<Arc<JobItemContext>> {
        self.items
            .get(&(job_id.clone(), sharding_item))
            .map(|item| item.runner.context().clone())
    }

    /// Sharding items of `job_id` running here, ascending.
    pub fn running_items(&self, job_id: &JobId) -> Vec<u32> {
        let mut items: Vec<u32> = self
            .items
            .iter()
            .filter(|entry| &entry.key().0 == job_id)
            .map(|entry| entry.key().1)
            .collect();
        items.sort_unstable();
        items
    }
}
