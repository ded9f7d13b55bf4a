use super::{FailureHandler, PipelineTask, TaskParams, spawn_importers};
use crate::{engine::TaskHandle, error::TaskError};
use engine_config::task::InventoryDumperConfiguration;
use engine_core::context::item::{SlotClaim, TaskSlot};
use engine_processing::{
    channel::{AckCallback, PipelineChannel},
    dumper::InventoryDumperCreator,
};
use model::{core::identifiers::TaskId, position::Position};
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bulk copy of one split of one table. Completes on its own once the
/// split is exhausted and every importer saw the finished record.
pub struct InventoryTask {
    task_id: TaskId,
    slot: TaskSlot,
    dumper_config: InventoryDumperConfiguration,
    dumper_creator: Arc<dyn InventoryDumperCreator>,
    params: TaskParams,
    started: AtomicBool,
    cancel: CancellationToken,
    channel: OnceLock<Arc<dyn PipelineChannel>>,
    claim: OnceLock<SlotClaim>,
}

impl InventoryTask {
    pub fn new(
        dumper_config: InventoryDumperConfiguration,
        dumper_creator: Arc<dyn InventoryDumperCreator>,
        params: TaskParams,
    ) -> Self {
        let task_id = TaskId::new(dumper_config.task_id());
        params
            .context
            .advance_inventory_progress(&task_id, Position::Placeholder);

        Self {
            slot: TaskSlot::Inventory(task_id.clone()),
            task_id,
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
        let task_id = self.task_id.clone();
        Arc::new(move |position| {
            context.advance_inventory_progress(&task_id, position);
        })
    }
}

impl PipelineTask for InventoryTask {
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
        let claim = self.params.context.claim(self.slot.clone(), &self.task_id)?;
        self.claim.get_or_init(|| claim);

        let consumers = self.params.importer_config.concurrency.max(1);
        let channel = self
            .params
            .channel_factory
            .create(consumers, Some(self.ack_callback()));
        let channel = self.channel.get_or_init(|| channel).clone();
        if self.cancel.is_cancelled() {
            channel.close();
            self.params.context.release(&self.slot, claim);
        }

        let range = self.dumper_config.range.clone();
        info!(
            task_id = %self.task_id,
            table = %self.dumper_config.actual_table_name,
            range = %range,
            importers = channel.lane_count(),
            "Starting inventory task"
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
                    failures.dumper_result(dumper.run(range, channel, cancel).await)
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
        self.cancel.cancel();
        if let Some(channel) = self.channel.get() {
            channel.close();
        }
        if let Some(claim) = self.claim.get() {
            self.params.context.release(&self.slot, *claim);
        }
    }

    fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    fn task_progress(&self) -> Position {
        self.params
            .context
            .inventory_progress(&self.task_id)
            .unwrap_or_default()
    }
}
