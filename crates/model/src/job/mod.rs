pub mod data_node;
pub mod job_id;
pub mod job_type;

pub use data_node::{DataNode, JobDataNodeEntry, JobDataNodeLine};
pub use job_id::{
    ConsistencyCheckJobId, JobIdError, MigrationJobId, PipelineJobId,
    marshal_job_id_common_prefix, parse_job_type,
};
pub use job_type::JobType;
