use crate::{
    channel::PipelineChannel,
    error::{ChannelError, ImporterError},
    metadata::TableMetaDataLoader,
};
use async_trait::async_trait;
use engine_config::task::ImporterConfiguration;
use engine_core::retry::{RetryDisposition, RetryError, RetryPolicy};
use model::{
    core::identifiers::TaskId,
    records::{
        batch::{Batch, WriteAck},
        record::{DataRecord, Record},
    },
};
use std::{sync::Arc, time::Duration, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Commits batches of records to the target database.
#[async_trait]
pub trait ImporterConnector: Send + Sync {
    async fn write(&self, batch: &Batch) -> Result<WriteAck, ImporterError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub batches: usize,
    pub rows: usize,
}

/// Drains one channel lane into the target.
///
/// Records are fetched up to the configured batch size, grouped by table and
/// written through the connector; the lane is acknowledged only after every
/// group of a fetch was committed. Stops on a finished record, on
/// cancellation, or when the channel closes.
pub struct Importer {
    task_id: TaskId,
    lane: usize,
    config: ImporterConfiguration,
    channel: Arc<dyn PipelineChannel>,
    connector: Arc<dyn ImporterConnector>,
    metadata: Arc<dyn TableMetaDataLoader>,
    retry: RetryPolicy,
    poll_timeout: Duration,
    cancel: CancellationToken,
}

impl Importer {
    pub fn new(
        task_id: TaskId,
        lane: usize,
        config: ImporterConfiguration,
        channel: Arc<dyn PipelineChannel>,
        connector: Arc<dyn ImporterConnector>,
        metadata: Arc<dyn TableMetaDataLoader>,
        cancel: CancellationToken,
    ) -> Self {
        let retry = RetryPolicy::from_retry_times(config.retry_times);
        Self {
            task_id,
            lane,
            config,
            channel,
            connector,
            metadata,
            retry,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            cancel,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub async fn run(self) -> Result<ImportSummary, ImporterError> {
        let mut summary = ImportSummary::default();
        debug!(task_id = %self.task_id, lane = self.lane, "Importer started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                fetched = self.channel.fetch(self.lane, self.config.batch_size, self.poll_timeout) => fetched,
            };
            let records = match fetched {
                Ok(records) => records,
                Err(ChannelError::Closed) => break,
                Err(e) => return Err(e.into()),
            };
            if records.is_empty() {
                continue;
            }

            let finished = records.iter().any(Record::is_finished);
            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                written = self.write_records(&records) => written?,
            };
            summary.batches += written.batches;
            summary.rows += written.rows;
            self.channel.ack(self.lane, &records);

            if finished {
                break;
            }
        }

        info!(
            task_id = %self.task_id,
            lane = self.lane,
            batches = summary.batches,
            rows = summary.rows,
            "Importer finished"
        );
        Ok(summary)
    }

    async fn write_records(&self, records: &[Record]) -> Result<ImportSummary, ImporterError> {
        let mut summary = ImportSummary::default();

        for (table, rows) in group_by_table(records) {
            let meta = self.metadata.load(None, &table).await?;
            let batch = Batch {
                id: batch_id(&self.task_id, self.lane, &rows),
                table_name: table,
                next: rows
                    .last()
                    .map(|r| r.position.clone())
                    .unwrap_or_default(),
                records: rows,
                meta,
            };

            let started = Instant::now();
            let ack = self.write_batch(&batch).await?;
            summary.batches += 1;
            summary.rows += ack.rows_written;

            debug!(
                task_id = %self.task_id,
                batch_id = %batch.id,
                table = %batch.table_name,
                rows = ack.rows_written,
                duration_ms = started.elapsed().as_millis() as u64,
                "Batch written"
            );
        }

        Ok(summary)
    }

    async fn write_batch(&self, batch: &Batch) -> Result<WriteAck, ImporterError> {
        let connector = self.connector.clone();
        self.retry
            .run(
                || {
                    let connector = connector.clone();
                    async move { connector.write(batch).await }
                },
                |e: &ImporterError| {
                    if e.is_retryable() {
                        RetryDisposition::Retry
                    } else {
                        RetryDisposition::Stop
                    }
                },
            )
            .await
            .map_err(|e| match e {
                RetryError::Fatal(e) => e,
                RetryError::AttemptsExceeded { attempts, last } => ImporterError::RetriesExhausted {
                    batch_id: batch.id.clone(),
                    table: batch.table_name.clone(),
                    attempts,
                    message: last.to_string(),
                },
            })
    }
}

/// Data records grouped by table in order of first appearance, keeping
/// record order inside each group.
fn group_by_table(records: &[Record]) -> Vec<(String, Vec<DataRecord>)> {
    let mut groups: Vec<(String, Vec<DataRecord>)> = Vec::new();
    for record in records.iter().filter_map(Record::as_data) {
        match groups.iter_mut().find(|(table, _)| *table == record.table_name) {
            Some((_, rows)) => rows.push(record.clone()),
            None => groups.push((record.table_name.clone(), vec![record.clone()])),
        }
    }
    groups
}

fn batch_id(task_id: &TaskId, lane: usize, rows: &[DataRecord]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(task_id.as_str().as_bytes());
    hasher.update(&lane.to_le_bytes());
    hasher.update(&rows.len().to_le_bytes());
    if let (Some(first), Some(last)) = (rows.first(), rows.last()) {
        hasher.update(first.position.to_string().as_bytes());
        hasher.update(last.position.to_string().as_bytes());
    }
    hasher.finalize().to_hex().as_str()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::memory::MemoryPipelineChannel,
        fixture::{RecordingConnector, StaticMetaDataLoader},
    };
    use model::{
        position::Position,
        records::record::{Column, Operation},
    };
    use serde_json::json;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    fn row(table: &str, id: i64, lsn: u64) -> Record {
        DataRecord::new(table, Operation::Insert, Position::Wal { lsn })
            .with_column(Column::new("id", json!(id), true))
            .into()
    }

    fn config(batch_size: usize, retry_times: usize) -> ImporterConfiguration {
        ImporterConfiguration {
            target_database_name: "sharding_db".into(),
            batch_size,
            concurrency: 1,
            retry_times,
            channel_capacity: 100,
        }
    }

    fn importer(
        channel: Arc<dyn PipelineChannel>,
        connector: Arc<RecordingConnector>,
        retry_times: usize,
        cancel: CancellationToken,
    ) -> Importer {
        Importer::new(
            TaskId::new("ds_0"),
            0,
            config(10, retry_times),
            channel,
            connector,
            Arc::new(StaticMetaDataLoader::default()),
            cancel,
        )
        .with_retry(RetryPolicy::new(
            retry_times + 1,
            Duration::from_millis(1),
            Duration::from_millis(2),
        ))
        .with_poll_timeout(Duration::from_millis(10))
    }

    #[test]
    fn groups_keep_table_and_record_order() {
        let records = vec![
            row("t_order", 1, 1),
            row("t_item", 10, 2),
            Record::Placeholder {
                position: Position::Wal { lsn: 3 },
            },
            row("t_order", 2, 4),
        ];
        let groups = group_by_table(&records);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "t_order");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[0].1[1].position, Position::Wal { lsn: 4 });
        assert_eq!(groups[1].0, "t_item");
    }

    #[tokio::test]
    async fn writes_until_finished_and_acks() {
        let acked = Arc::new(Mutex::new(Vec::new()));
        let sink = acked.clone();
        let channel: Arc<dyn PipelineChannel> = Arc::new(MemoryPipelineChannel::new(
            100,
            Some(Arc::new(move |p: Position| sink.lock().unwrap().push(p))),
        ));
        channel
            .push(vec![
                row("t_order", 1, 1),
                row("t_item", 1, 2),
                Record::Finished {
                    position: Position::Finished,
                },
            ])
            .await
            .unwrap();

        let connector = Arc::new(RecordingConnector::default());
        let summary = importer(channel, connector.clone(), 0, CancellationToken::new())
            .run()
            .await
            .unwrap();

        assert_eq!(summary, ImportSummary { batches: 2, rows: 2 });
        assert_eq!(connector.tables(), vec!["t_order".to_string(), "t_item".to_string()]);
        assert_eq!(acked.lock().unwrap().last(), Some(&Position::Finished));
    }

    #[tokio::test]
    #[traced_test]
    async fn retries_transient_failures() {
        let channel: Arc<dyn PipelineChannel> = Arc::new(MemoryPipelineChannel::new(100, None));
        channel
            .push(vec![
                row("t_order", 1, 1),
                Record::Finished {
                    position: Position::Finished,
                },
            ])
            .await
            .unwrap();

        let connector = Arc::new(RecordingConnector::failing(2));
        let summary = importer(channel, connector.clone(), 3, CancellationToken::new())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.rows, 1);
        assert_eq!(connector.attempts(), 3);
        assert!(logs_contain("Retrying after failure"));
    }

    #[tokio::test]
    async fn gives_up_without_acking() {
        let acked = Arc::new(Mutex::new(Vec::new()));
        let sink = acked.clone();
        let channel: Arc<dyn PipelineChannel> = Arc::new(MemoryPipelineChannel::new(
            100,
            Some(Arc::new(move |p: Position| sink.lock().unwrap().push(p))),
        ));
        channel.push(vec![row("t_order", 1, 1)]).await.unwrap();

        let connector = Arc::new(RecordingConnector::failing(usize::MAX));
        let err = importer(channel, connector, 1, CancellationToken::new())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ImporterError::RetriesExhausted { attempts: 2, .. }));
        assert!(acked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let channel: Arc<dyn PipelineChannel> = Arc::new(MemoryPipelineChannel::new(100, None));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            importer(channel, Arc::new(RecordingConnector::default()), 0, cancel.clone()).run(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary, ImportSummary::default());
    }
}
