use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::job_id::JobIdError;

/// Closed set of pipeline job types.
///
/// The two-character code is embedded in every job id right after the
/// leading `j`, so the type can be recovered from the id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Migration,
    ConsistencyCheck,
    Cdc,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::Migration, JobType::ConsistencyCheck, JobType::Cdc];

    pub fn code(&self) -> &'static str {
        match self {
            JobType::Migration => "01",
            JobType::ConsistencyCheck => "02",
            JobType::Cdc => "03",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Migration => "MIGRATION",
            JobType::ConsistencyCheck => "CONSISTENCY_CHECK",
            JobType::Cdc => "CDC",
        }
    }

    pub fn from_code(code: &str) -> Option<JobType> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| JobIdError::UnknownJobType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique_and_two_chars() {
        for t in JobType::ALL {
            assert_eq!(t.code().len(), 2);
            assert_eq!(JobType::from_code(t.code()), Some(t));
        }
        assert_eq!(JobType::from_code("99"), None);
    }

    #[test]
    fn parses_names_loosely() {
        assert_eq!("migration".parse::<JobType>().unwrap(), JobType::Migration);
        assert_eq!(
            "consistency-check".parse::<JobType>().unwrap(),
            JobType::ConsistencyCheck
        );
        assert!("streaming".parse::<JobType>().is_err());
    }
}
