use super::{
    ChangeKind, ClusterRepository, DataChangedEvent, PersistRepository, ancestors, child_name,
    is_in_subtree, validate_key,
};
use crate::error::RepositoryError;
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{Mutex, mpsc::UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone)]
struct Node {
    value: String,
    /// Session owning an ephemeral node, `None` for persistent ones.
    owner: Option<u64>,
}

struct Watcher {
    prefix: String,
    sender: UnboundedSender<DataChangedEvent>,
}

#[derive(Default)]
struct Store {
    nodes: BTreeMap<String, Node>,
    watchers: Vec<Watcher>,
    closed_sessions: HashSet<u64>,
}

impl Store {
    fn put(&mut self, key: &str, value: &str, owner: Option<u64>) -> Vec<DataChangedEvent> {
        let mut events = Vec::new();

        for parent in ancestors(key) {
            if !self.nodes.contains_key(parent) {
                self.nodes.insert(
                    parent.to_string(),
                    Node {
                        value: String::new(),
                        owner: None,
                    },
                );
                events.push(DataChangedEvent {
                    key: parent.to_string(),
                    value: String::new(),
                    kind: ChangeKind::Added,
                });
            }
        }

        let previous = self.nodes.insert(
            key.to_string(),
            Node {
                value: value.to_string(),
                owner,
            },
        );
        events.push(DataChangedEvent {
            key: key.to_string(),
            value: value.to_string(),
            kind: if previous.is_some() {
                ChangeKind::Updated
            } else {
                ChangeKind::Added
            },
        });

        events
    }

    fn remove_where<F>(&mut self, predicate: F) -> Vec<DataChangedEvent>
    where
        F: Fn(&str, &Node) -> bool,
    {
        let doomed: Vec<String> = self
            .nodes
            .iter()
            .filter(|(k, n)| predicate(k.as_str(), n))
            .map(|(k, _)| k.clone())
            .collect();

        // Deepest first, so watchers see children go before their parent.
        doomed
            .into_iter()
            .rev()
            .filter_map(|key| {
                self.nodes.remove(&key).map(|node| DataChangedEvent {
                    key,
                    value: node.value,
                    kind: ChangeKind::Deleted,
                })
            })
            .collect()
    }

    fn dispatch(&mut self, events: Vec<DataChangedEvent>) {
        self.watchers.retain(|w| !w.sender.is_closed());
        for event in events {
            for watcher in &self.watchers {
                if is_in_subtree(&watcher.prefix, &event.key) {
                    let _ = watcher.sender.send(event.clone());
                }
            }
        }
    }
}

struct Shared {
    store: Mutex<Store>,
    next_session: AtomicU64,
}

/// In-process coordination service.
///
/// Every clone of a handle shares the same session; [`connect`] opens a new
/// session against the same data, the way a separate worker process would.
/// Closing a session drops the ephemeral keys it created.
///
/// [`connect`]: MemoryClusterRepository::connect
#[derive(Clone)]
pub struct MemoryClusterRepository {
    shared: Arc<Shared>,
    session_id: u64,
}

impl Default for MemoryClusterRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClusterRepository {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(Store::default()),
                next_session: AtomicU64::new(2),
            }),
            session_id: 1,
        }
    }

    /// Opens a new session on the same store.
    pub fn connect(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            session_id: self.shared.next_session.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Ends this session and deletes every ephemeral key it owns.
    pub async fn close_session(&self) {
        let session_id = self.session_id;
        let mut store = self.shared.store.lock().await;
        if !store.closed_sessions.insert(session_id) {
            return;
        }

        let events = store.remove_where(|_, node| node.owner == Some(session_id));
        debug!(
            session_id,
            removed = events.len(),
            "Closed repository session"
        );
        store.dispatch(events);
    }
}

#[async_trait]
impl PersistRepository for MemoryClusterRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let store = self.shared.store.lock().await;
        Ok(store.nodes.get(key).map(|n| n.value.clone()))
    }

    async fn persist(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        validate_key(key)?;
        let mut store = self.shared.store.lock().await;
        let events = store.put(key, value, None);
        store.dispatch(events);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        let mut store = self.shared.store.lock().await;
        let events = store.remove_where(|k, _| is_in_subtree(key, k));
        store.dispatch(events);
        Ok(())
    }

    async fn is_existed(&self, key: &str) -> Result<bool, RepositoryError> {
        let store = self.shared.store.lock().await;
        Ok(store.nodes.contains_key(key))
    }

    async fn get_children_keys(&self, key: &str) -> Result<Vec<String>, RepositoryError> {
        let store = self.shared.store.lock().await;
        let children: BTreeSet<&str> = store
            .nodes
            .keys()
            .filter_map(|k| child_name(key, k))
            .collect();
        Ok(children.into_iter().map(str::to_string).collect())
    }
}

#[async_trait]
impl ClusterRepository for MemoryClusterRepository {
    async fn persist_ephemeral(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        validate_key(key)?;
        let mut store = self.shared.store.lock().await;
        if store.closed_sessions.contains(&self.session_id) {
            return Err(RepositoryError::SessionClosed(self.session_id));
        }

        let events = store.put(key, value, Some(self.session_id));
        store.dispatch(events);
        Ok(())
    }

    async fn watch(
        &self,
        prefix: &str,
        sender: UnboundedSender<DataChangedEvent>,
    ) -> Result<(), RepositoryError> {
        validate_key(prefix)?;
        let mut store = self.shared.store.lock().await;
        store.watchers.push(Watcher {
            prefix: prefix.to_string(),
            sender,
        });
        Ok(())
    }
}
