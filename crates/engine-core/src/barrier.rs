use crate::{
    error::BarrierError,
    node_path,
    repository::{ChangeKind, ClusterRepository, DataChangedEvent},
};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Local one-shot gate of a barrier path.
struct BarrierGate {
    total_count: usize,
    fired: watch::Sender<bool>,
}

impl BarrierGate {
    fn new(total_count: usize) -> Self {
        let (fired, _) = watch::channel(false);
        Self { total_count, fired }
    }

    fn fire(&self) {
        self.fired.send_replace(true);
    }
}

/// Cluster-wide rendezvous built on the coordination store.
///
/// A barrier is a persistent node; every participant announces itself by
/// creating an ephemeral child named after its sharding item. The local gate
/// for the path fires once the number of children reaches the expected total,
/// or when the barrier is unregistered.
///
/// Store failures are logged and absorbed: a barrier that cannot be observed
/// behaves like one that never becomes ready.
pub struct DistributedBarrier {
    repository: Arc<dyn ClusterRepository>,
    gates: DashMap<String, BarrierGate>,
}

impl DistributedBarrier {
    pub fn new(repository: Arc<dyn ClusterRepository>) -> Self {
        Self {
            repository,
            gates: DashMap::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn ClusterRepository> {
        &self.repository
    }

    /// Creates the barrier node and, if none exists yet, a local gate expecting
    /// `total_count` children. An existing gate keeps its original count.
    pub async fn register(&self, barrier_path: &str, total_count: usize) {
        if let Err(e) = self.repository.persist(barrier_path, "").await {
            warn!(path = barrier_path, error = %e, "Failed to persist barrier node");
        }
        self.gates
            .entry(barrier_path.to_string())
            .or_insert_with(|| BarrierGate::new(total_count));
        debug!(path = barrier_path, total_count, "Registered barrier");
    }

    /// Announces `sharding_item` under the barrier, replacing any stale child
    /// left by a previous session. Does nothing if the barrier node is gone.
    pub async fn persist_ephemeral_children_node(&self, barrier_path: &str, sharding_item: u32) {
        match self.repository.is_existed(barrier_path).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    path = barrier_path,
                    sharding_item, "Barrier node absent, skipping child"
                );
                return;
            }
            Err(e) => {
                warn!(path = barrier_path, error = %e, "Failed to check barrier node");
                return;
            }
        }

        let key = format!("{barrier_path}/{sharding_item}");
        if let Err(e) = self.repository.delete(&key).await {
            warn!(key = %key, error = %e, "Failed to delete stale barrier child");
        }
        if let Err(e) = self.repository.persist_ephemeral(&key, "").await {
            warn!(key = %key, error = %e, "Failed to persist barrier child");
        }
    }

    /// Removes the barrier node and releases every local waiter.
    pub async fn unregister(&self, barrier_path: &str) {
        if let Err(e) = self.repository.delete(barrier_path).await {
            warn!(path = barrier_path, error = %e, "Failed to delete barrier node");
        }
        if let Some((_, gate)) = self.gates.remove(barrier_path) {
            gate.fire();
        }
        debug!(path = barrier_path, "Unregistered barrier");
    }

    /// Waits for the gate of `barrier_path` to fire.
    ///
    /// Returns `false` when no gate is registered, when the gate disappears
    /// without firing, or on timeout.
    pub async fn await_ready(&self, barrier_path: &str, timeout: Duration) -> bool {
        let Some(mut fired) = self
            .gates
            .get(barrier_path)
            .map(|gate| gate.fired.subscribe())
        else {
            return false;
        };

        match tokio::time::timeout(timeout, fired.wait_for(|f| *f)).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                info!(
                    path = barrier_path,
                    timeout_ms = timeout.as_millis() as u64,
                    "await timeout"
                );
                false
            }
        }
    }

    /// Fires the gate of the barrier `node_path` belongs to when its child
    /// count has reached the expected total.
    pub async fn notify_children_node_count_check(&self, node_path: &str) {
        if node_path.is_empty() {
            return;
        }
        let Some(idx) = node_path.rfind('/') else {
            return;
        };
        let barrier_path = &node_path[..idx];

        let Some(total_count) = self.gates.get(barrier_path).map(|g| g.total_count) else {
            return;
        };

        let children = match self.repository.get_children_keys(barrier_path).await {
            Ok(children) => children,
            Err(e) => {
                warn!(path = barrier_path, error = %e, "Failed to list barrier children");
                return;
            }
        };

        if children.len() == total_count {
            if let Some(gate) = self.gates.get(barrier_path) {
                gate.fire();
                debug!(path = barrier_path, total_count, "Barrier ready");
            }
        }
    }
}

/// Forwards barrier child creations seen in the coordination store to
/// [`DistributedBarrier::notify_children_node_count_check`].
pub struct BarrierChildrenListener;

impl BarrierChildrenListener {
    pub async fn spawn(
        barrier: Arc<DistributedBarrier>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BarrierError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DataChangedEvent>();
        barrier
            .repository()
            .watch(node_path::JOBS_PATH, tx)
            .await?;

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        if event.kind == ChangeKind::Added && node_path::is_barrier_child(&event.key) {
                            barrier.notify_children_node_count_check(&event.key).await;
                        }
                    }
                }
            }
            debug!("Barrier children listener stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{PersistRepository, memory::MemoryClusterRepository};
    use std::time::Instant;
    use tracing_test::traced_test;

    const PATH: &str = "/pipeline/jobs/j0102test/barrier/enable";

    fn barrier() -> (MemoryClusterRepository, Arc<DistributedBarrier>) {
        let repo = MemoryClusterRepository::new();
        let barrier = Arc::new(DistributedBarrier::new(Arc::new(repo.clone())));
        (repo, barrier)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn all_children_release_waiters() {
        let (_, barrier) = barrier();
        barrier.register(PATH, 2).await;

        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.await_ready(PATH, Duration::from_secs(5)).await })
        };

        for item in 0..2 {
            barrier.persist_ephemeral_children_node(PATH, item).await;
            barrier
                .notify_children_node_count_check(&format!("{PATH}/{item}"))
                .await;
        }

        assert!(waiter.await.unwrap());
    }

    #[traced_test]
    #[tokio::test]
    async fn missing_children_time_out() {
        let (_, barrier) = barrier();
        barrier.register(PATH, 5).await;
        barrier.persist_ephemeral_children_node(PATH, 0).await;
        barrier
            .notify_children_node_count_check(&format!("{PATH}/0"))
            .await;

        assert!(!barrier.await_ready(PATH, Duration::from_millis(200)).await);
        assert!(logs_contain("await timeout"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unregister_releases_blocked_waiter() {
        let (repo, barrier) = barrier();
        barrier.register(PATH, 5).await;

        let started = Instant::now();
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.await_ready(PATH, Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        barrier.unregister(PATH).await;

        assert!(waiter.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!repo.is_existed(PATH).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_path_is_not_ready() {
        let (_, barrier) = barrier();
        let started = Instant::now();
        assert!(!barrier.await_ready("nonexistent", Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn register_keeps_existing_gate() {
        let (_, barrier) = barrier();
        barrier.register(PATH, 1).await;
        barrier.register(PATH, 3).await;

        barrier.persist_ephemeral_children_node(PATH, 0).await;
        barrier
            .notify_children_node_count_check(&format!("{PATH}/0"))
            .await;

        assert!(barrier.await_ready(PATH, Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn child_is_skipped_without_barrier_node() {
        let (repo, barrier) = barrier();
        barrier.persist_ephemeral_children_node(PATH, 0).await;
        assert!(!repo.is_existed(&format!("{PATH}/0")).await.unwrap());
    }

    #[tokio::test]
    async fn notify_ignores_malformed_paths() {
        let (_, barrier) = barrier();
        barrier.register(PATH, 0).await;
        barrier.notify_children_node_count_check("").await;
        barrier.notify_children_node_count_check("no-slash").await;
        assert!(!barrier.await_ready(PATH, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn re_persisting_child_replaces_it() {
        let (repo, barrier) = barrier();
        barrier.register(PATH, 2).await;
        barrier.persist_ephemeral_children_node(PATH, 1).await;
        barrier.persist_ephemeral_children_node(PATH, 1).await;

        assert_eq!(
            repo.get_children_keys(PATH).await.unwrap(),
            vec!["1".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn listener_drives_notification_across_sessions() {
        let (repo, barrier) = barrier();
        let cancel = CancellationToken::new();
        let listener = BarrierChildrenListener::spawn(barrier.clone(), cancel.clone())
            .await
            .unwrap();

        barrier.register(PATH, 2).await;

        let workers: Vec<_> = (0..2)
            .map(|_| Arc::new(DistributedBarrier::new(Arc::new(repo.connect()))))
            .collect();
        for (item, worker) in workers.iter().enumerate() {
            worker.persist_ephemeral_children_node(PATH, item as u32).await;
        }

        assert!(barrier.await_ready(PATH, Duration::from_secs(5)).await);

        cancel.cancel();
        listener.await.unwrap();
    }
}
