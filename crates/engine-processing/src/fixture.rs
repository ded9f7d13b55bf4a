//! Scripted dumpers, a recording importer connector and a static metadata
//! loader for driving pipelines without a database.

use crate::{
    channel::PipelineChannel,
    dumper::{IncrementalDumper, IncrementalDumperCreator, InventoryDumper, InventoryDumperCreator},
    error::{DumperError, ImporterError, MetaDataError},
    importer::ImporterConnector,
    metadata::TableMetaDataLoader,
};
use async_trait::async_trait;
use engine_config::task::{DumperConfiguration, InventoryDumperConfiguration};
use model::{
    metadata::table::TableMetaData,
    position::Position,
    records::{
        batch::{Batch, WriteAck},
        record::{Column, DataRecord, Operation, Record},
    },
};
use serde_json::json;
use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a scripted incremental dumper does once its records are pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Keep tailing until cancelled.
    Tail,
    /// Return as if the log ended.
    Return,
    /// Fail with a source error.
    Fail(String),
}

/// Replays a fixed change log, skipping everything at or before the resume position.
#[derive(Clone)]
pub struct ScriptedIncrementalDumperCreator {
    script: Vec<Record>,
    end: ScriptEnd,
    started_from: Arc<Mutex<Vec<(String, Position)>>>,
}

impl ScriptedIncrementalDumperCreator {
    pub fn new(script: Vec<Record>, end: ScriptEnd) -> Self {
        Self {
            script,
            end,
            started_from: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Data source and resume position of every dumper run so far.
    pub fn started_from(&self) -> Vec<(String, Position)> {
        lock(&self.started_from).clone()
    }
}

impl IncrementalDumperCreator for ScriptedIncrementalDumperCreator {
    fn create(
        &self,
        config: &DumperConfiguration,
        _metadata: Arc<dyn TableMetaDataLoader>,
    ) -> Result<Box<dyn IncrementalDumper>, DumperError> {
        Ok(Box::new(ScriptedIncrementalDumper {
            data_source_name: config.data_source_name.clone(),
            script: self.script.clone(),
            end: self.end.clone(),
            started_from: self.started_from.clone(),
        }))
    }
}

struct ScriptedIncrementalDumper {
    data_source_name: String,
    script: Vec<Record>,
    end: ScriptEnd,
    started_from: Arc<Mutex<Vec<(String, Position)>>>,
}

#[async_trait]
impl IncrementalDumper for ScriptedIncrementalDumper {
    async fn run(
        &mut self,
        position: Position,
        channel: Arc<dyn PipelineChannel>,
        cancel: CancellationToken,
    ) -> Result<(), DumperError> {
        lock(&self.started_from).push((self.data_source_name.clone(), position.clone()));

        let pending: Vec<Record> = self
            .script
            .iter()
            .filter(|r| {
                position.is_placeholder()
                    || r.position().partial_cmp(&position) == Some(CmpOrdering::Greater)
            })
            .cloned()
            .collect();

        for record in pending {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                pushed = channel.push(vec![record]) => pushed?,
            }
        }

        match &self.end {
            ScriptEnd::Tail => {
                cancel.cancelled().await;
                Ok(())
            }
            ScriptEnd::Return => Ok(()),
            ScriptEnd::Fail(message) => Err(DumperError::Source {
                data_source: self.data_source_name.clone(),
                message: message.clone(),
            }),
        }
    }
}

/// Serves tables of integer ids keyed by actual table name.
#[derive(Clone, Default)]
pub struct ScriptedInventoryDumperCreator {
    tables: BTreeMap<String, Vec<i64>>,
    failing: Vec<String>,
    scanned: Arc<Mutex<Vec<(String, Position)>>>,
}

impl ScriptedInventoryDumperCreator {
    pub fn with_table(mut self, actual_table: &str, ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        self.tables.insert(actual_table.to_string(), ids);
        self
    }

    /// Dumpers of `actual_table` fail instead of scanning.
    pub fn failing_on(mut self, actual_table: &str) -> Self {
        self.failing.push(actual_table.to_string());
        self
    }

    /// Table and range of every split scanned so far.
    pub fn scanned(&self) -> Vec<(String, Position)> {
        lock(&self.scanned).clone()
    }
}

#[async_trait]
impl InventoryDumperCreator for ScriptedInventoryDumperCreator {
    fn create(
        &self,
        config: &InventoryDumperConfiguration,
        _metadata: Arc<dyn TableMetaDataLoader>,
    ) -> Result<Box<dyn InventoryDumper>, DumperError> {
        Ok(Box::new(ScriptedInventoryDumper {
            data_source_name: config.dumper.data_source_name.clone(),
            actual_table: config.actual_table_name.clone(),
            logic_table: config.logic_table_name.clone(),
            key_column: config
                .unique_key_column
                .clone()
                .unwrap_or_else(|| "id".to_string()),
            ids: self
                .tables
                .get(&config.actual_table_name)
                .cloned()
                .unwrap_or_default(),
            fail: self.failing.contains(&config.actual_table_name),
            scanned: self.scanned.clone(),
        }))
    }

    async fn unique_key_range(
        &self,
        _data_source_name: &str,
        table: &str,
        _column: &str,
    ) -> Result<Option<(i64, i64)>, DumperError> {
        Ok(self
            .tables
            .get(table)
            .and_then(|ids| Some((*ids.first()?, *ids.last()?))))
    }
}

struct ScriptedInventoryDumper {
    data_source_name: String,
    actual_table: String,
    logic_table: String,
    key_column: String,
    ids: Vec<i64>,
    fail: bool,
    scanned: Arc<Mutex<Vec<(String, Position)>>>,
}

#[async_trait]
impl InventoryDumper for ScriptedInventoryDumper {
    async fn run(
        &mut self,
        range: Position,
        channel: Arc<dyn PipelineChannel>,
        cancel: CancellationToken,
    ) -> Result<(), DumperError> {
        if self.fail {
            return Err(DumperError::Source {
                data_source: self.data_source_name.clone(),
                message: format!("scan of {} failed", self.actual_table),
            });
        }
        lock(&self.scanned).push((self.actual_table.clone(), range.clone()));

        let (begin, end) = match range {
            Position::IntegerPrimaryKey { begin, end } => (begin, end),
            Position::Placeholder => (i64::MIN, i64::MAX),
            other => {
                return Err(DumperError::UnsupportedPosition {
                    data_source: self.data_source_name.clone(),
                    position: other.to_string(),
                });
            }
        };

        for id in self.ids.iter().copied().filter(|id| (begin..=end).contains(id)) {
            let record = DataRecord::new(
                self.logic_table.clone(),
                Operation::Insert,
                Position::IntegerPrimaryKey { begin: id, end },
            )
            .with_column(Column::new(self.key_column.clone(), json!(id), true));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                pushed = channel.push(vec![record.into()]) => pushed?,
            }
        }

        channel
            .push(vec![Record::Finished {
                position: Position::Finished,
            }])
            .await?;
        Ok(())
    }
}

/// Keeps every committed batch in memory.
#[derive(Default)]
pub struct RecordingConnector {
    batches: Mutex<Vec<Batch>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    fatal: bool,
    stalled: bool,
}

impl RecordingConnector {
    /// Fails the first `times` writes with a retryable error.
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    /// Fails every write with a non-retryable error.
    pub fn fatal() -> Self {
        Self {
            fatal: true,
            ..Self::default()
        }
    }

    /// Never completes a write.
    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Batch> {
        lock(&self.batches).clone()
    }

    /// Table of each committed batch, in commit order.
    pub fn tables(&self) -> Vec<String> {
        lock(&self.batches)
            .iter()
            .map(|b| b.table_name.clone())
            .collect()
    }

    pub fn rows(&self) -> usize {
        lock(&self.batches).iter().map(Batch::len).sum()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImporterConnector for RecordingConnector {
    async fn write(&self, batch: &Batch) -> Result<WriteAck, ImporterError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.stalled {
            std::future::pending::<()>().await;
        }

        let transient = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if self.fatal || transient {
            return Err(ImporterError::Write {
                batch_id: batch.id.clone(),
                table: batch.table_name.clone(),
                message: "connection reset".to_string(),
                retryable: !self.fatal,
            });
        }

        lock(&self.batches).push(batch.clone());
        Ok(WriteAck {
            rows_written: batch.len(),
        })
    }
}

/// Metadata of a fixed set of tables.
#[derive(Default)]
pub struct StaticMetaDataLoader {
    tables: HashMap<String, Arc<TableMetaData>>,
}

impl StaticMetaDataLoader {
    pub fn with_table(mut self, meta: TableMetaData) -> Self {
        self.tables
            .insert(meta.name.to_ascii_lowercase(), Arc::new(meta));
        self
    }
}

#[async_trait]
impl TableMetaDataLoader for StaticMetaDataLoader {
    async fn load(
        &self,
        _schema: Option<&str>,
        table: &str,
    ) -> Result<Option<Arc<TableMetaData>>, MetaDataError> {
        Ok(self.tables.get(&table.to_ascii_lowercase()).cloned())
    }
}
