#![allow(dead_code)]

use engine_core::{
    context::item::{JobItemContext, JobStatus},
    repository::{PersistRepository, memory::MemoryClusterRepository},
};
use model::{
    position::Position,
    records::record::{Column, DataRecord, Operation, Record},
};
use serde_json::json;
use std::time::Duration;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn wal(lsn: u64) -> Position {
    Position::Wal { lsn }
}

/// Update of row `id` of `t_order` at `wal(lsn)`.
pub fn order_change(id: i64, lsn: u64) -> Record {
    DataRecord::new("t_order", Operation::Update, wal(lsn))
        .with_column(Column::new("id", json!(id), true))
        .into()
}

/// Heartbeat that reaches every importer lane.
pub fn heartbeat(lsn: u64) -> Record {
    Record::Placeholder { position: wal(lsn) }
}

/// Waits until `key` exists in the cluster, panicking after a few seconds.
pub async fn wait_for_key(cluster: &MemoryClusterRepository, key: &str) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !cluster.is_existed(key).await.expect("check key") {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected key '{key}' to appear"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_incremental_progress(context: &JobItemContext, position: Position) {
    let mut progress = context.subscribe_incremental_progress();
    tokio::time::timeout(WAIT_TIMEOUT, progress.wait_for(|p| *p == position))
        .await
        .unwrap_or_else(|_| panic!("expected incremental progress {position}"))
        .expect("progress channel open");
}

pub async fn wait_for_status(context: &JobItemContext, status: JobStatus) {
    let mut watched = context.subscribe_status();
    tokio::time::timeout(WAIT_TIMEOUT, watched.wait_for(|s| *s == status))
        .await
        .unwrap_or_else(|_| panic!("expected job item status {status}"))
        .expect("status channel open");
}

/// Barrier children currently persisted under `path`.
pub async fn barrier_children(cluster: &MemoryClusterRepository, path: &str) -> Vec<String> {
    cluster.get_children_keys(path).await.expect("list children")
}
