use crate::position::Position;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// Value before the change, only set for updates and deletes.
    pub old_value: Option<Value>,
    pub value: Value,
    pub updated: bool,
    pub unique_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, value: Value, unique_key: bool) -> Self {
        Self {
            name: name.into(),
            old_value: None,
            value,
            updated: true,
            unique_key,
        }
    }
}

/// A single row change read from a source data node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub table_name: String,
    pub operation: Operation,
    pub columns: Vec<Column>,
    pub position: Position,
}

impl DataRecord {
    pub fn new(table_name: impl Into<String>, operation: Operation, position: Position) -> Self {
        Self {
            table_name: table_name.into(),
            operation,
            columns: Vec::new(),
            position,
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Unique key values identifying the row; the old value wins for key updates.
    pub fn unique_key_values(&self) -> Vec<&Value> {
        self.columns
            .iter()
            .filter(|c| c.unique_key)
            .map(|c| c.old_value.as_ref().unwrap_or(&c.value))
            .collect()
    }

    /// Stable text identifying the row across changes, used for lane routing.
    pub fn routing_key(&self) -> String {
        let mut key = self.table_name.clone();
        for value in self.unique_key_values() {
            key.push('\u{1f}');
            key.push_str(&value.to_string());
        }
        key
    }
}

/// Unit flowing through a pipeline channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Data(DataRecord),

    /// Carries a position without data, e.g. a heartbeat or a skipped event,
    /// so that idle tasks still advance their progress.
    Placeholder { position: Position },

    /// Marks the end of a finite stream.
    Finished { position: Position },
}

impl Record {
    pub fn position(&self) -> &Position {
        match self {
            Record::Data(r) => &r.position,
            Record::Placeholder { position } | Record::Finished { position } => position,
        }
    }

    pub fn as_data(&self) -> Option<&DataRecord> {
        match self {
            Record::Data(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Record::Finished { .. })
    }
}

impl From<DataRecord> for Record {
    fn from(record: DataRecord) -> Self {
        Record::Data(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order(id: i64, old_id: Option<i64>) -> DataRecord {
        let mut key = Column::new("order_id", json!(id), true);
        key.old_value = old_id.map(|v| json!(v));
        DataRecord::new("t_order", Operation::Update, Position::Placeholder)
            .with_column(key)
            .with_column(Column::new("status", json!("OK"), false))
    }

    #[test]
    fn routing_key_uses_old_key_value() {
        assert_eq!(order(2, Some(1)).routing_key(), order(1, None).routing_key());
        assert_ne!(order(2, None).routing_key(), order(1, None).routing_key());
    }

    #[test]
    fn record_exposes_position() {
        let pos = Position::Wal { lsn: 42 };
        let record = Record::Placeholder {
            position: pos.clone(),
        };
        assert_eq!(record.position(), &pos);
        assert!(record.as_data().is_none());
        assert!(Record::Finished { position: Position::Finished }.is_finished());
    }
}
