use super::{PersistRepository, ancestors, child_name, is_in_subtree, validate_key};
use crate::error::RepositoryError;
use async_trait::async_trait;
use std::{collections::BTreeSet, path::Path};

/// On-disk repository for standalone mode, where a single process owns the state.
pub struct SledRepository {
    db: sled::Db,
}

impl SledRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<String, RepositoryError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| RepositoryError::Encoding {
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl PersistRepository for SledRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(Self::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn persist(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        validate_key(key)?;
        for parent in ancestors(key) {
            if !self.db.contains_key(parent)? {
                self.db.insert(parent, "")?;
            }
        }
        self.db.insert(key, value)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        let mut doomed = Vec::new();
        for item in self.db.scan_prefix(key) {
            let (k, _) = item?;
            let k = Self::decode(key, &k)?;
            if is_in_subtree(key, &k) {
                doomed.push(k);
            }
        }

        for k in doomed {
            self.db.remove(k)?;
        }
        Ok(())
    }

    async fn is_existed(&self, key: &str) -> Result<bool, RepositoryError> {
        Ok(self.db.contains_key(key)?)
    }

    async fn get_children_keys(&self, key: &str) -> Result<Vec<String>, RepositoryError> {
        let mut children = BTreeSet::new();
        for item in self.db.scan_prefix(key) {
            let (k, _) = item?;
            let k = Self::decode(key, &k)?;
            if let Some(name) = child_name(key, &k) {
                children.insert(name.to_string());
            }
        }
        Ok(children.into_iter().collect())
    }
}
