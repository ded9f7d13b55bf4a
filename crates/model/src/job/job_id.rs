use super::{data_node::JobDataNodeLine, job_type::JobType};
use crate::core::identifiers::JobId;
use thiserror::Error;

/// Current marshalling format version, the two characters after the type code.
pub const CURRENT_VERSION: &str = "02";

const PREFIX_LEN: usize = 1 + 2 + 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobIdError {
    #[error("Invalid job id: '{0}'")]
    InvalidJobId(String),

    #[error("Unknown job type code '{code}' in job id '{job_id}'")]
    UnknownTypeCode { code: String, job_id: String },

    #[error("Unknown job type: '{0}'")]
    UnknownJobType(String),
}

/// `j` + type code + format version.
pub fn marshal_job_id_common_prefix(job_type: JobType) -> String {
    format!("j{}{}", job_type.code(), CURRENT_VERSION)
}

/// Recovers the job type from the id prefix alone.
pub fn parse_job_type(job_id: &str) -> Result<JobType, JobIdError> {
    if job_id.len() <= 3 || !job_id.starts_with('j') || !job_id.is_char_boundary(3) {
        return Err(JobIdError::InvalidJobId(job_id.to_string()));
    }

    let code = &job_id[1..3];
    JobType::from_code(code).ok_or_else(|| JobIdError::UnknownTypeCode {
        code: code.to_string(),
        job_id: job_id.to_string(),
    })
}

/// Source of a marshalled job id.
pub trait PipelineJobId {
    fn job_type(&self) -> JobType;

    /// Type specific part appended after the common prefix.
    fn marshal_suffix(&self) -> String;

    fn marshal(&self) -> JobId {
        JobId::new(format!(
            "{}{}",
            marshal_job_id_common_prefix(self.job_type()),
            self.marshal_suffix()
        ))
    }
}

/// Identity of a migration job: which data nodes move into which database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationJobId {
    pub job_sharding_data_nodes: Vec<JobDataNodeLine>,
    pub database_name: String,
}

impl MigrationJobId {
    pub fn new(job_sharding_data_nodes: Vec<JobDataNodeLine>, database_name: impl Into<String>) -> Self {
        Self {
            job_sharding_data_nodes,
            database_name: database_name.into(),
        }
    }

    /// Text the md5 suffix is computed from.
    fn digest_source(&self) -> String {
        let lines: Vec<String> = self
            .job_sharding_data_nodes
            .iter()
            .map(ToString::to_string)
            .collect();
        format!("{}|{}", lines.join("|"), self.database_name)
    }
}

impl PipelineJobId for MigrationJobId {
    fn job_type(&self) -> JobType {
        JobType::Migration
    }

    fn marshal_suffix(&self) -> String {
        format!("{:x}", md5::compute(self.digest_source().as_bytes()))
    }
}

/// Identity of a consistency check run against a parent job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyCheckJobId {
    pub parent_job_id: JobId,
    pub sequence: u8,
}

impl ConsistencyCheckJobId {
    pub const MAX_SEQUENCE: u8 = 9;

    pub fn new(parent_job_id: JobId, sequence: u8) -> Self {
        Self {
            parent_job_id,
            sequence: sequence.min(Self::MAX_SEQUENCE),
        }
    }

    /// Sequence following the one encoded in `check_job_id`, wrapping after 9.
    pub fn next_sequence(check_job_id: &str) -> Result<u8, JobIdError> {
        let current = Self::parse_sequence(check_job_id)?;
        Ok(if current >= Self::MAX_SEQUENCE { 0 } else { current + 1 })
    }

    /// The last character of a consistency check job id is its sequence.
    pub fn parse_sequence(check_job_id: &str) -> Result<u8, JobIdError> {
        match parse_job_type(check_job_id)? {
            JobType::ConsistencyCheck => {}
            _ => return Err(JobIdError::InvalidJobId(check_job_id.to_string())),
        }
        check_job_id
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .map(|d| d as u8)
            .filter(|_| check_job_id.len() > PREFIX_LEN)
            .ok_or_else(|| JobIdError::InvalidJobId(check_job_id.to_string()))
    }
}

impl PipelineJobId for ConsistencyCheckJobId {
    fn job_type(&self) -> JobType {
        JobType::ConsistencyCheck
    }

    fn marshal_suffix(&self) -> String {
        format!("{}{}", self.parent_job_id, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migration_id() -> MigrationJobId {
        MigrationJobId::new(
            vec!["t_order:ds_0.t_order_0,ds_0.t_order_1".parse().unwrap()],
            "sharding_db",
        )
    }

    #[test]
    fn parse_job_type_from_prefix_and_suffix() {
        let prefix = marshal_job_id_common_prefix(migration_id().job_type());
        let job_id = format!("{prefix}abcd");

        assert_eq!(parse_job_type(&job_id).unwrap(), JobType::Migration);
        assert_eq!(parse_job_type(&prefix).unwrap(), parse_job_type(&job_id).unwrap());
    }

    #[test]
    fn marshal_is_stable_for_same_input() {
        let a = migration_id().marshal();
        let b = migration_id().marshal();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("j0102"));
        assert_eq!(a.as_str().len(), PREFIX_LEN + 32);

        let other = MigrationJobId::new(migration_id().job_sharding_data_nodes, "other_db").marshal();
        assert_ne!(a, other);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(matches!(parse_job_type("j01"), Err(JobIdError::InvalidJobId(_))));
        assert!(matches!(parse_job_type("x0102ab"), Err(JobIdError::InvalidJobId(_))));
        assert!(matches!(
            parse_job_type("j9902ab"),
            Err(JobIdError::UnknownTypeCode { .. })
        ));
    }

    #[test]
    fn consistency_check_id_carries_parent_and_sequence() {
        let parent = migration_id().marshal();
        let check_id = ConsistencyCheckJobId::new(parent.clone(), 9).marshal();

        assert_eq!(parse_job_type(check_id.as_str()).unwrap(), JobType::ConsistencyCheck);
        assert!(check_id.as_str().contains(parent.as_str()));
        assert_eq!(ConsistencyCheckJobId::parse_sequence(check_id.as_str()).unwrap(), 9);
        assert_eq!(ConsistencyCheckJobId::next_sequence(check_id.as_str()).unwrap(), 0);
        assert!(ConsistencyCheckJobId::parse_sequence(parent.as_str()).is_err());
    }
}
