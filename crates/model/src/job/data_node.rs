use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataNodeParseError {
    #[error("Invalid data node '{0}', expected '<data source>.<table>'")]
    DataNode(String),

    #[error("Invalid data node entry '{0}', expected '<logic table>:<data node>[,<data node>...]'")]
    Entry(String),

    #[error("Empty data node line")]
    EmptyLine,
}

/// Physical table on a given data source, written as `ds_0.t_order_0`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataNode {
    pub data_source_name: String,
    pub table_name: String,
}

impl DataNode {
    pub fn new(data_source_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            data_source_name: data_source_name.into(),
            table_name: table_name.into(),
        }
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source_name, self.table_name)
    }
}

impl FromStr for DataNode {
    type Err = DataNodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((ds, table)) if !ds.is_empty() && !table.is_empty() && !table.contains('.') => {
                Ok(DataNode::new(ds, table))
            }
            _ => Err(DataNodeParseError::DataNode(s.to_string())),
        }
    }
}

/// One logic table and the data nodes it is spread over.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobDataNodeEntry {
    pub logic_table_name: String,
    pub data_nodes: Vec<DataNode>,
}

impl fmt::Display for JobDataNodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.logic_table_name)?;
        for (idx, node) in self.data_nodes.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{node}")?;
        }
        Ok(())
    }
}

impl FromStr for JobDataNodeEntry {
    type Err = DataNodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (logic_table, nodes) = s
            .split_once(':')
            .ok_or_else(|| DataNodeParseError::Entry(s.to_string()))?;
        if logic_table.trim().is_empty() || nodes.trim().is_empty() {
            return Err(DataNodeParseError::Entry(s.to_string()));
        }

        let data_nodes = nodes
            .split(',')
            .map(DataNode::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobDataNodeEntry {
            logic_table_name: logic_table.trim().to_string(),
            data_nodes,
        })
    }
}

/// All entries handled by one sharding item of a job, entries joined by `|`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobDataNodeLine {
    pub entries: Vec<JobDataNodeEntry>,
}

impl JobDataNodeLine {
    pub fn new(entries: Vec<JobDataNodeEntry>) -> Self {
        Self { entries }
    }

    /// Distinct data source names in first-seen order.
    pub fn data_source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for node in self.entries.iter().flat_map(|e| e.data_nodes.iter()) {
            if !names.contains(&node.data_source_name.as_str()) {
                names.push(&node.data_source_name);
            }
        }
        names
    }
}

impl fmt::Display for JobDataNodeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str("|")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

impl FromStr for JobDataNodeLine {
    type Err = DataNodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(DataNodeParseError::EmptyLine);
        }
        let entries = s
            .split('|')
            .map(JobDataNodeEntry::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JobDataNodeLine { entries })
    }
}
