use super::{FailureHandler, PipelineTask, TaskParams, spawn_importers};
use crate::{engine::TaskHandle, error::TaskError};
use engine_config::task::DumperConfiguration;
use engine_core::context::item::{SlotClaim, TaskSlot};
use engine_processing::{
    channel::{AckCallback, PipelineChannel},
    dumper::IncrementalDumperCreator,
};
use model::{core::identifiers::TaskId, position::Position};
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Change-stream replay of one data source of a job item.
///
/// Progress is the position acknowledged by the importers, kept on the job
/// item context so it survives the task. Only one incremental task of a job
/// item may run at a time.
pub struct IncrementalTask {
    task_id: TaskId,
    dumper_config: DumperConfiguration,
    dumper_creator: Arc<dyn IncrementalDumperCreator>,
    params: TaskParams,
    started: AtomicBool,
    cancel: CancellationToken,
    channel: OnceLock<Arc<dyn PipelineChannel>>,
    claim: OnceLock<SlotClaim>,
}

impl IncrementalTask {
    pub fn new(
        task_id: impl Into<TaskId>,
        dumper_config: DumperConfiguration,
        dumper_creator: Arc<dyn IncrementalDumperCreator>,
        params: TaskParams,
    ) -> Self {
        params
            .context
            .advance_incremental_progress(dumper_config.position.clone());

        Self {
            task_id: task_id.into(),
            dumper_config,
            dumper_creator,
            params,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            channel: OnceLock::new(),
            claim: OnceLock::new(),
        }
    }

    fn ack_callback(&self) -> AckCallback {
        let context = self.params.context.clone();
        Arc::new(move |position| {
            context.advance_incremental_progress(position);
        })
    }
}

impl PipelineTask for IncrementalTask {
    fn start(&self) -> Result<Vec<TaskHandle>, TaskError> {
        if self.cancel.is_cancelled() {
            return Err(TaskError::Stopped(self.task_id.to_string()));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TaskError::AlreadyStarted(self.task_id.to_string()));
        }

        let mut dumper = self
            .dumper_creator
            .create(&self.dumper_config, self.params.metadata.clone())
            .map_err(|source| TaskError::Dumper {
                task_id: self.task_id.to_string(),
                source,
            })?;
        let claim = self
            .params
            .context
            .claim(TaskSlot::Incremental, &self.task_id)?;
        self.claim.get_or_init(|| claim);

        let consumers = self.params.importer_config.concurrency.max(1);
        let channel = self
            .params
            .channel_factory
            .create(consumers, Some(self.ack_callback()));
        let channel = self.channel.get_or_init(|| channel).clone();
        // stop() may have run between the checks above and here.
        if self.cancel.is_cancelled() {
            channel.close();
            self.params.context.release(&TaskSlot::Incremental, claim);
        }

        let position = self.params.context.incremental_progress();
        info!(
            task_id = %self.task_id,
            data_source = %self.dumper_config.data_source_name,
            position = %position,
            importers = channel.lane_count(),
            "Starting incremental task"
        );

        let failures = FailureHandler::new(
            self.task_id.clone(),
            self.params.context.clone(),
            self.cancel.clone(),
            channel.clone(),
        );

        let mut handles = Vec::with_capacity(channel.lane_count() + 1);
        handles.push({
            let channel = channel.clone();
            let cancel = self.cancel.clone();
            let failures = failures.clone();
            self.params
                .engine
                .submit(format!("{}-dumper", self.task_id), async move {
                    failures.dumper_result(dumper.run(position, channel, cancel).await)
                })
        });
        handles.extend(spawn_importers(
            &self.params,
            &self.task_id,
            &channel,
            &self.cancel,
            &failures,
        ));

        Ok(handles)
    }

    fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(task_id = %self.task_id, "Stopping incremental task");
        }
        self.cancel.cancel();
        if let Some(channel) = self.channel.get() {
            channel.close();
        }
        if let Some(claim) = self.claim.get() {
            self.params.context.release(&TaskSlot::Incremental, *claim);
        }
    }

    fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    fn task_progress(&self) -> Position {
        self.params.context.incremental_progress()
    }
}
