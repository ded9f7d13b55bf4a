use crate::{metadata::table::TableMetaData, position::Position, records::record::DataRecord};
use std::sync::Arc;

/// Records of one target table handed to an importer connector in one write.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    pub table_name: String,
    pub records: Vec<DataRecord>,
    /// Position of the last record, acknowledged once the batch is committed.
    pub next: Position,
    pub meta: Option<Arc<TableMetaData>>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Result of a committed batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteAck {
    pub rows_written: usize,
}
