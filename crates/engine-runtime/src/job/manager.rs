use super::{PipelineJobConfiguration, worker::PipelineJobWorker};
use crate::error::JobError;
use engine_core::{
    barrier::{BarrierChildrenListener, DistributedBarrier},
    node_path,
};
use model::core::identifiers::JobId;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_BARRIER_TIMEOUT: Duration = Duration::from_secs(30);

/// Starts and stops jobs across the cluster.
///
/// Starting registers the job's enable barrier for every sharding item,
/// starts the items assigned to this process and waits until all items of
/// the job, wherever they run, have announced themselves. Stopping does the
/// same on the disable barrier.
pub struct PipelineJobManager {
    barrier: Arc<DistributedBarrier>,
    worker: Arc<PipelineJobWorker>,
    barrier_timeout: Duration,
    listener_cancel: CancellationToken,
    listener: JoinHandle<()>,
}

impl PipelineJobManager {
    /// Starts listening for barrier children of all jobs.
    pub async fn start(
        barrier: Arc<DistributedBarrier>,
        worker: Arc<PipelineJobWorker>,
        barrier_timeout: Duration,
    ) -> Result<Self, JobError> {
        let listener_cancel = CancellationToken::new();
        let listener = BarrierChildrenListener::spawn(barrier.clone(), listener_cancel.clone()).await?;

        Ok(Self {
            barrier,
            worker,
            barrier_timeout,
            listener_cancel,
            listener,
        })
    }

    pub fn worker(&self) -> &Arc<PipelineJobWorker> {
        &self.worker
    }

    pub async fn start_job(
        &self,
        job: &PipelineJobConfiguration,
        local_items: &[u32],
    ) -> Result<(), JobError> {
        let path = node_path::job_barrier_enable_path(job.job_id.as_str());
        self.barrier
            .register(&path, job.sharding_total_count())
            .await;
        info!(
            job_id = %job.job_id,
            sharding_total_count = job.sharding_total_count(),
            local_items = ?local_items,
            "Starting job"
        );

        for &item in local_items {
            if let Err(e) = self.worker.start_item(job, item).await {
                self.barrier.unregister(&path).await;
                return Err(e);
            }
        }

        self.pass_barrier(&job.job_id, &path).await
    }

    pub async fn stop_job(
        &self,
        job_id: &JobId,
        sharding_total_count: usize,
        local_items: &[u32],
    ) -> Result<(), JobError> {
        let path = node_path::job_barrier_disable_path(job_id.as_str());
        self.barrier.register(&path, sharding_total_count).await;
        info!(job_id = %job_id, local_items = ?local_items, "Stopping job");

        for &item in local_items {
            if let Some(status) = self.worker.stop_item(job_id, item).await {
                info!(job_id = %job_id, sharding_item = item, status = %status, "Job item final status");
            }
        }

        self.pass_barrier(job_id, &path).await
    }

    async fn pass_barrier(&self, job_id: &JobId, path: &str) -> Result<(), JobError> {
        let ready = self.barrier.await_ready(path, self.barrier_timeout).await;
        self.barrier.unregister(path).await;

        if ready {
            info!(job_id = %job_id, path, "Barrier passed");
            Ok(())
        } else {
            warn!(job_id = %job_id, path, "Barrier not passed");
            Err(JobError::BarrierTimeout {
                job_id: job_id.to_string(),
                path: path.to_string(),
                timeout_ms: self.barrier_timeout.as_millis() as u64,
            })
        }
    }

    /// Stops the barrier listener.
    pub async fn shutdown(self) {
        self.listener_cancel.cancel();
        if let Err(e) = self.listener.await {
            warn!(error = %e, "Barrier listener did not stop cleanly");
        }
    }
}
