//! Coordination store layout.
//!
//! ```text
//! /pipeline
//!   /jobs/<job_id>/barrier/enable/<sharding_item>
//!   /jobs/<job_id>/barrier/disable/<sharding_item>
//!   /jobs/<job_id>/items/<sharding_item>/incremental
//!   /jobs/<job_id>/items/<sharding_item>/inventory/<task_id>
//!   /metadata/<job_type>/process_config
//! ```

use model::job::JobType;

pub const ROOT_PATH: &str = "/pipeline";
pub const JOBS_PATH: &str = "/pipeline/jobs";

const BARRIER_ENABLE: &str = "barrier/enable";
const BARRIER_DISABLE: &str = "barrier/disable";

pub fn job_path(job_id: &str) -> String {
    format!("{JOBS_PATH}/{job_id}")
}

/// Barrier the sharding items of a job pass once they have started.
pub fn job_barrier_enable_path(job_id: &str) -> String {
    format!("{}/{BARRIER_ENABLE}", job_path(job_id))
}

/// Barrier the sharding items of a job pass once they have stopped.
pub fn job_barrier_disable_path(job_id: &str) -> String {
    format!("{}/{BARRIER_DISABLE}", job_path(job_id))
}

/// Progress of one sharding item of a job.
pub fn job_item_path(job_id: &str, sharding_item: u32) -> String {
    format!("{}/items/{sharding_item}", job_path(job_id))
}

pub fn job_item_incremental_path(job_id: &str, sharding_item: u32) -> String {
    format!("{}/incremental", job_item_path(job_id, sharding_item))
}

/// Parent of the per-split inventory positions of a sharding item.
pub fn job_item_inventory_path(job_id: &str, sharding_item: u32) -> String {
    format!("{}/inventory", job_item_path(job_id, sharding_item))
}

pub fn process_config_path(job_type: JobType) -> String {
    format!(
        "{ROOT_PATH}/metadata/{}/process_config",
        job_type.as_str().to_ascii_lowercase()
    )
}

/// Whether `key` is a child node of some job's enable or disable barrier.
pub fn is_barrier_child(key: &str) -> bool {
    let Some(rest) = key.strip_prefix(JOBS_PATH).and_then(|r| r.strip_prefix('/')) else {
        return false;
    };
    let mut parts = rest.split('/');
    let (Some(job_id), Some("barrier"), Some("enable" | "disable"), Some(item), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    !job_id.is_empty() && !item.is_empty()
}
