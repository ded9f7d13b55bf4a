use super::{JobCollaborators, PipelineJobConfiguration};
use crate::{
    engine::await_all,
    error::{JobError, TaskError},
    task::{
        PipelineTask, TaskParams, incremental::IncrementalTask, inventory::InventoryTask,
        splitter::InventoryTaskSplitter,
    },
};
use engine_config::{
    process::ProcessConfiguration,
    task::{DumperConfiguration, ImporterConfiguration},
};
use engine_core::context::item::{JobItemContext, JobStatus};
use engine_processing::{channel::factory::ChannelFactory, metadata::CachingTableMetaDataLoader};
use model::{core::identifiers::TaskId, position::Position};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Drives one sharding item of a job: every inventory split to completion,
/// then the incremental task until stopped.
pub struct JobItemRunner {
    context: Arc<JobItemContext>,
    inventory_tasks: Vec<Arc<dyn PipelineTask>>,
    inventory_concurrency: usize,
    incremental_task: Arc<dyn PipelineTask>,
    cancel: CancellationToken,
}

impl JobItemRunner {
    pub fn new(
        context: Arc<JobItemContext>,
        inventory_tasks: Vec<Arc<dyn PipelineTask>>,
        inventory_concurrency: usize,
        incremental_task: Arc<dyn PipelineTask>,
    ) -> Self {
        Self {
            context,
            inventory_tasks,
            inventory_concurrency: inventory_concurrency.max(1),
            incremental_task,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds the tasks of `sharding_item`, resuming from the progress
    /// already recorded on `context`. Finished inventory splits are skipped.
    pub async fn prepare(
        job: &PipelineJobConfiguration,
        sharding_item: u32,
        process: &ProcessConfiguration,
        collaborators: &JobCollaborators,
        context: Arc<JobItemContext>,
    ) -> Result<Self, JobError> {
        let line = job
            .job_sharding_data_nodes
            .get(sharding_item as usize)
            .ok_or_else(|| JobError::NoSuchShardingItem {
                job_id: job.job_id.to_string(),
                sharding_item,
                total: job.sharding_total_count(),
            })?;
        let data_sources = line.data_source_names();
        let [data_source] = data_sources.as_slice() else {
            return Err(JobError::MixedDataSources {
                job_id: job.job_id.to_string(),
                sharding_item,
                data_sources: data_sources.iter().map(|s| s.to_string()).collect(),
            });
        };

        let params = TaskParams {
            importer_config: ImporterConfiguration::from_process(
                job.target_database_name.as_str(),
                process,
                job.retry_times,
            )?,
            channel_factory: ChannelFactory::from_config(&process.stream_channel)?,
            connector: collaborators.connector.clone(),
            metadata: Arc::new(CachingTableMetaDataLoader::new(
                collaborators.metadata.clone(),
            )),
            engine: collaborators.engine.clone(),
            context: context.clone(),
        };

        let dumper_config = DumperConfiguration::for_data_source(
            line,
            data_source,
            context.incremental_progress(),
            process,
        );

        let splits = InventoryTaskSplitter::new(process.read.sharding_size)
            .split(
                &dumper_config,
                &job.unique_key_column,
                collaborators.inventory_dumper_creator.as_ref(),
            )
            .await?;

        let mut inventory_tasks: Vec<Arc<dyn PipelineTask>> = Vec::with_capacity(splits.len());
        for mut split in splits {
            match context.inventory_progress(&TaskId::new(split.task_id())) {
                Some(progress) if progress.is_finished() => continue,
                Some(progress) => split.range = resume_range(&split.range, &progress),
                None => {}
            }
            inventory_tasks.push(Arc::new(InventoryTask::new(
                split,
                collaborators.inventory_dumper_creator.clone(),
                params.clone(),
            )));
        }

        let incremental_task = Arc::new(IncrementalTask::new(
            *data_source,
            dumper_config,
            collaborators.incremental_dumper_creator.clone(),
            params,
        ));

        info!(
            job_id = %job.job_id,
            sharding_item,
            data_source = %data_source,
            inventory_tasks = inventory_tasks.len(),
            "Prepared job item"
        );

        Ok(Self::new(
            context,
            inventory_tasks,
            process.read.concurrency,
            incremental_task,
        ))
    }

    pub fn context(&self) -> &Arc<JobItemContext> {
        &self.context
    }

    pub fn inventory_tasks(&self) -> &[Arc<dyn PipelineTask>] {
        &self.inventory_tasks
    }

    pub fn incremental_task(&self) -> &Arc<dyn PipelineTask> {
        &self.incremental_task
    }

    /// Runs until the incremental task ends, which normally means until
    /// [`JobItemRunner::stop`]. Failures are recorded on the context.
    pub async fn run(&self) -> Result<(), JobError> {
        self.context.set_status(JobStatus::Running);

        match self.run_tasks().await {
            Ok(()) => {
                self.context.set_status(if self.cancel.is_cancelled() {
                    JobStatus::Stopped
                } else {
                    JobStatus::Finished
                });
                Ok(())
            }
            Err(JobError::Task(TaskError::Stopped(_))) if self.cancel.is_cancelled() => {
                self.context.set_status(JobStatus::Stopped);
                Ok(())
            }
            Err(e) => {
                if self.context.status() != JobStatus::Failed {
                    self.context.record_failure(None, e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn run_tasks(&self) -> Result<(), JobError> {
        for chunk in self.inventory_tasks.chunks(self.inventory_concurrency) {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let mut handles = Vec::new();
            let mut start_error = None;
            for task in chunk {
                match task.start() {
                    Ok(started) => handles.extend(started),
                    Err(e) => {
                        start_error = Some(e);
                        break;
                    }
                }
            }
            if start_error.is_some() {
                chunk.iter().for_each(|task| task.stop());
            }

            let result = await_all(handles).await;
            chunk.iter().for_each(|task| task.stop());
            if let Some(e) = start_error {
                return Err(e.into());
            }
            result?;
        }

        if self.cancel.is_cancelled() {
            return Ok(());
        }
        info!(
            job_id = %self.context.job_id(),
            sharding_item = self.context.sharding_item(),
            task_id = %self.incremental_task.task_id(),
            "Inventory done, starting incremental task"
        );
        await_all(self.incremental_task.start()?).await?;
        Ok(())
    }

    /// Stops every task of the item. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        self.cancel.cancel();
        for task in &self.inventory_tasks {
            task.stop();
        }
        self.incremental_task.stop();
    }
}

/// Remaining part of `range` after `progress`, the last committed position of the split.
fn resume_range(range: &Position, progress: &Position) -> Position {
    match (range, progress) {
        (
            Position::IntegerPrimaryKey { end, .. },
            Position::IntegerPrimaryKey { begin: last, .. },
        ) => Position::IntegerPrimaryKey {
            begin: last.saturating_add(1),
            end: *end,
        },
        _ => range.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecuteEngine;
    use engine_processing::fixture::{
        RecordingConnector, ScriptEnd, ScriptedIncrementalDumperCreator,
        ScriptedInventoryDumperCreator, StaticMetaDataLoader,
    };
    use model::{
        job::JobDataNodeLine,
        records::record::{Column, DataRecord, Operation, Record},
    };
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        job: PipelineJobConfiguration,
        process: ProcessConfiguration,
        collaborators: JobCollaborators,
        incremental: ScriptedIncrementalDumperCreator,
        inventory: ScriptedInventoryDumperCreator,
        connector: Arc<RecordingConnector>,
    }

    fn wal(lsn: u64) -> Position {
        Position::Wal { lsn }
    }

    fn change(id: i64, lsn: u64) -> Record {
        DataRecord::new("t_order", Operation::Update, wal(lsn))
            .with_column(Column::new("id", json!(id), true))
            .into()
    }

    fn harness(inventory: ScriptedInventoryDumperCreator, script: Vec<Record>, end: ScriptEnd) -> Harness {
        let lines: Vec<JobDataNodeLine> = vec![
            "t_order:ds_0.t_order_0,ds_0.t_order_1".parse().unwrap(),
            "t_order:ds_1.t_order_2|t_item:ds_0.t_item_0".parse().unwrap(),
        ];
        let job = PipelineJobConfiguration::migration(lines, "sharding_db").with_retry_times(0);
        let mut process = ProcessConfiguration::default();
        process.read.sharding_size = 10;
        process.read.concurrency = 2;
        process.write.concurrency = 2;
        process.write.batch_size = 8;

        let incremental = ScriptedIncrementalDumperCreator::new(script, end);
        let connector = Arc::new(RecordingConnector::default());
        let collaborators = JobCollaborators {
            incremental_dumper_creator: Arc::new(incremental.clone()),
            inventory_dumper_creator: Arc::new(inventory.clone()),
            connector: connector.clone(),
            metadata: Arc::new(StaticMetaDataLoader::default()),
            engine: ExecuteEngine::new("test"),
        };

        Harness {
            job,
            process,
            collaborators,
            incremental,
            inventory,
            connector,
        }
    }

    async fn prepare(h: &Harness, item: u32, context: Arc<JobItemContext>) -> Result<JobItemRunner, JobError> {
        JobItemRunner::prepare(&h.job, item, &h.process, &h.collaborators, context).await
    }

    fn context(h: &Harness, item: u32) -> Arc<JobItemContext> {
        Arc::new(JobItemContext::new(h.job.job_id.clone(), item))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inventory_then_incremental() {
        let h = harness(
            ScriptedInventoryDumperCreator::default()
                .with_table("t_order_0", 1..=25)
                .with_table("t_order_1", 100..=104),
            vec![
                change(1, 10),
                change(2, 20),
                // Heartbeat reaching every lane, so lanes without changes catch up.
                Record::Placeholder { position: wal(21) },
            ],
            ScriptEnd::Tail,
        );
        let context = context(&h, 0);
        let runner = Arc::new(prepare(&h, 0, context.clone()).await.unwrap());
        assert_eq!(runner.inventory_tasks().len(), 4);
        assert_eq!(runner.incremental_task().task_id().as_str(), "ds_0");

        let run = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run().await }
        });

        let mut progress = context.subscribe_incremental_progress();
        tokio::time::timeout(Duration::from_secs(5), progress.wait_for(|p| *p == wal(21)))
            .await
            .unwrap()
            .unwrap();
        assert!(context.is_inventory_finished());
        assert_eq!(context.status(), JobStatus::Running);

        runner.stop();
        run.await.unwrap().unwrap();

        assert_eq!(context.status(), JobStatus::Stopped);
        assert_eq!(h.connector.rows(), 25 + 5 + 2);
        assert_eq!(h.incremental.started_from(), vec![("ds_0".to_string(), Position::Placeholder)]);
    }

    #[tokio::test]
    async fn finished_splits_are_skipped_and_partial_ones_resume() {
        let h = harness(
            ScriptedInventoryDumperCreator::default().with_table("t_order_0", 1..=20),
            Vec::new(),
            ScriptEnd::Tail,
        );
        let context = context(&h, 0);
        context.advance_inventory_progress(&TaskId::new("ds_0.t_order_0#0"), Position::Finished);
        context.advance_inventory_progress(
            &TaskId::new("ds_0.t_order_0#1"),
            Position::IntegerPrimaryKey { begin: 15, end: 20 },
        );

        let runner = prepare(&h, 0, context).await.unwrap();
        let ids: Vec<&str> = runner
            .inventory_tasks()
            .iter()
            .map(|t| t.task_id().as_str())
            .collect();
        assert_eq!(ids, vec!["ds_0.t_order_0#1", "ds_0.t_order_1#0"]);

        runner.stop();
        runner.run().await.unwrap();
        assert!(h.inventory.scanned().is_empty());
    }

    #[test]
    fn resume_range_skips_committed_keys() {
        let range = Position::IntegerPrimaryKey { begin: 11, end: 20 };
        assert_eq!(
            resume_range(&range, &Position::IntegerPrimaryKey { begin: 15, end: 20 }),
            Position::IntegerPrimaryKey { begin: 16, end: 20 }
        );
        assert_eq!(
            resume_range(&range, &Position::IntegerPrimaryKey { begin: 11, end: 20 }),
            Position::IntegerPrimaryKey { begin: 12, end: 20 }
        );
        assert_eq!(resume_range(&range, &Position::Placeholder), range);
        assert_eq!(resume_range(&Position::Placeholder, &wal(3)), Position::Placeholder);
    }

    #[tokio::test]
    async fn rejects_unknown_and_mixed_items() {
        let h = harness(ScriptedInventoryDumperCreator::default(), Vec::new(), ScriptEnd::Tail);

        assert!(matches!(
            prepare(&h, 5, context(&h, 5)).await,
            Err(JobError::NoSuchShardingItem { sharding_item: 5, total: 2, .. })
        ));
        assert!(matches!(
            prepare(&h, 1, context(&h, 1)).await,
            Err(JobError::MixedDataSources { sharding_item: 1, .. })
        ));
    }

    #[tokio::test]
    async fn inventory_failure_fails_item() {
        let h = harness(
            ScriptedInventoryDumperCreator::default()
                .with_table("t_order_0", 1..=5)
                .failing_on("t_order_1"),
            Vec::new(),
            ScriptEnd::Tail,
        );
        let context = context(&h, 0);
        let runner = prepare(&h, 0, context.clone()).await.unwrap();

        let err = runner.run().await.unwrap_err();

        assert!(matches!(err, JobError::Task(TaskError::Dumper { .. })));
        assert_eq!(context.status(), JobStatus::Failed);
        assert!(h.incremental.started_from().is_empty());
        let last_error = context.last_error().unwrap();
        assert_eq!(last_error.task_id, Some(TaskId::new("ds_0.t_order_1#0")));
    }

    #[tokio::test]
    async fn unsupported_channel_type_is_rejected() {
        let mut h = harness(ScriptedInventoryDumperCreator::default(), Vec::new(), ScriptEnd::Tail);
        h.process.stream_channel.kind = "KAFKA".into();

        assert!(matches!(
            prepare(&h, 0, context(&h, 0)).await,
            Err(JobError::ProcessConfig(_))
        ));
    }
}
