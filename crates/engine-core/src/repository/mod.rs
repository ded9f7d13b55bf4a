use crate::error::RepositoryError;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

pub mod memory;
pub mod sled_repo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
}

/// Change notification delivered to watchers of a key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChangedEvent {
    pub key: String,
    pub value: String,
    pub kind: ChangeKind,
}

/// Hierarchical key-value store with `/`-separated absolute keys.
///
/// Persisting a key creates its missing ancestors with empty values, and
/// deleting a key removes its whole subtree.
#[async_trait]
pub trait PersistRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError>;

    async fn persist(&self, key: &str, value: &str) -> Result<(), RepositoryError>;

    async fn delete(&self, key: &str) -> Result<(), RepositoryError>;

    async fn is_existed(&self, key: &str) -> Result<bool, RepositoryError>;

    /// Names (not full keys) of the direct children of `key`, sorted.
    async fn get_children_keys(&self, key: &str) -> Result<Vec<String>, RepositoryError>;
}

/// Coordination service shared by every worker of a cluster.
#[async_trait]
pub trait ClusterRepository: PersistRepository {
    /// Persists a key that lives only as long as the caller's session.
    async fn persist_ephemeral(&self, key: &str, value: &str) -> Result<(), RepositoryError>;

    /// Streams changes of every key under `prefix` into `sender` until it is dropped.
    async fn watch(
        &self,
        prefix: &str,
        sender: UnboundedSender<DataChangedEvent>,
    ) -> Result<(), RepositoryError>;
}

pub(crate) fn validate_key(key: &str) -> Result<(), RepositoryError> {
    if !key.starts_with('/') || (key.len() > 1 && key.ends_with('/')) || key.contains("//") {
        return Err(RepositoryError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Strict ancestors of `key`, shallowest first: `/a/b/c` yields `/a`, `/a/b`.
pub(crate) fn ancestors(key: &str) -> Vec<&str> {
    key.match_indices('/')
        .map(|(idx, _)| idx)
        .filter(|idx| *idx > 0)
        .map(|idx| &key[..idx])
        .collect()
}

/// Direct child name of `parent` that `key` lives under, if any.
pub(crate) fn child_name<'a>(parent: &str, key: &'a str) -> Option<&'a str> {
    let rest = if parent == "/" {
        key.strip_prefix('/')?
    } else {
        key.strip_prefix(parent)?.strip_prefix('/')?
    };
    let name = rest.split('/').next()?;
    (!name.is_empty()).then_some(name)
}

pub(crate) fn is_in_subtree(root: &str, key: &str) -> bool {
    key == root || child_name(root, key).is_some()
}
