use crate::{
    engine::{ExecuteEngine, TaskHandle},
    error::TaskError,
};
use engine_config::task::ImporterConfiguration;
use engine_core::context::item::JobItemContext;
use engine_processing::{
    channel::{PipelineChannel, factory::ChannelFactory},
    error::{ChannelError, DumperError},
    importer::{Importer, ImporterConnector},
    metadata::TableMetaDataLoader,
};
use model::{core::identifiers::TaskId, position::Position};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod incremental;
pub mod inventory;
pub mod splitter;

/// One unit of pipeline work inside a job item: a dumper feeding importers
/// through a channel.
pub trait PipelineTask: Send + Sync {
    /// Starts the dumper and importers, returning one handle per worker.
    fn start(&self) -> Result<Vec<TaskHandle>, TaskError>;

    /// Cancels all workers and closes the channel. Idempotent.
    fn stop(&self);

    fn task_id(&self) -> &TaskId;

    fn task_progress(&self) -> Position;
}

/// Collaborators shared by the tasks of one job item.
#[derive(Clone)]
pub struct TaskParams {
    pub importer_config: ImporterConfiguration,
    pub channel_factory: ChannelFactory,
    pub connector: Arc<dyn ImporterConnector>,
    pub metadata: Arc<dyn TableMetaDataLoader>,
    pub engine: ExecuteEngine,
    pub context: Arc<JobItemContext>,
}

/// Cancels a task's workers after a failure and records it on the job item.
#[derive(Clone)]
pub(crate) struct FailureHandler {
    task_id: TaskId,
    context: Arc<JobItemContext>,
    cancel: CancellationToken,
    channel: Arc<dyn PipelineChannel>,
}

impl FailureHandler {
    pub(crate) fn new(
        task_id: TaskId,
        context: Arc<JobItemContext>,
        cancel: CancellationToken,
        channel: Arc<dyn PipelineChannel>,
    ) -> Self {
        Self {
            task_id,
            context,
            cancel,
            channel,
        }
    }

    fn fail(&self, error: TaskError) -> Result<(), TaskError> {
        self.context
            .record_failure(Some(&self.task_id), error.to_string());
        self.cancel.cancel();
        self.channel.close();
        Err(error)
    }

    pub(crate) fn dumper_result(&self, result: Result<(), DumperError>) -> Result<(), TaskError> {
        match result {
            Ok(()) => Ok(()),
            // A push interrupted by stop().
            Err(DumperError::Channel(ChannelError::Closed)) if self.cancel.is_cancelled() => Ok(()),
            Err(source) => self.fail(TaskError::Dumper {
                task_id: self.task_id.to_string(),
                source,
            }),
        }
    }
}

/// Submits one importer per channel lane.
pub(crate) fn spawn_importers(
    params: &TaskParams,
    task_id: &TaskId,
    channel: &Arc<dyn PipelineChannel>,
    cancel: &CancellationToken,
    failures: &FailureHandler,
) -> Vec<TaskHandle> {
    (0..channel.lane_count())
        .map(|lane| {
            let importer = Importer::new(
                task_id.clone(),
                lane,
                params.importer_config.clone(),
                channel.clone(),
                params.connector.clone(),
                params.metadata.clone(),
                cancel.clone(),
            );
            let failures = failures.clone();
            let task_id = task_id.to_string();

            params
                .engine
                .submit(format!("{task_id}-importer-{lane}"), async move {
                    match importer.run().await {
                        Ok(_) => Ok(()),
                        Err(source) => failures.fail(TaskError::Importer { task_id, source }),
                    }
                })
        })
        .collect()
}
