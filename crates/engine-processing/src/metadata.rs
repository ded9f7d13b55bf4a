use crate::error::MetaDataError;
use async_trait::async_trait;
use dashmap::DashMap;
use model::metadata::table::TableMetaData;
use std::sync::Arc;
use tracing::debug;

/// Looks up column layouts of target tables.
#[async_trait]
pub trait TableMetaDataLoader: Send + Sync {
    async fn load(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Option<Arc<TableMetaData>>, MetaDataError>;
}

/// Remembers every table found by the wrapped loader. Misses are not cached,
/// so a table created later is picked up on the next lookup.
pub struct CachingTableMetaDataLoader {
    inner: Arc<dyn TableMetaDataLoader>,
    cache: DashMap<String, Arc<TableMetaData>>,
}

impl CachingTableMetaDataLoader {
    pub fn new(inner: Arc<dyn TableMetaDataLoader>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    fn cache_key(schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!("{schema}.{table}").to_ascii_lowercase(),
            None => table.to_ascii_lowercase(),
        }
    }

    pub fn cached_tables(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl TableMetaDataLoader for CachingTableMetaDataLoader {
    async fn load(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Option<Arc<TableMetaData>>, MetaDataError> {
        let key = Self::cache_key(schema, table);
        if let Some(meta) = self.cache.get(&key).map(|m| m.value().clone()) {
            return Ok(Some(meta));
        }

        let loaded = self.inner.load(schema, table).await?;
        if let Some(meta) = &loaded {
            debug!(table = %key, columns = meta.columns.len(), "Cached table metadata");
            self.cache.insert(key, meta.clone());
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TableMetaDataLoader for CountingLoader {
        async fn load(
            &self,
            schema: Option<&str>,
            table: &str,
        ) -> Result<Option<Arc<TableMetaData>>, MetaDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if table == "missing" {
                return Ok(None);
            }
            Ok(Some(Arc::new(TableMetaData {
                schema: schema.map(str::to_string),
                name: table.to_string(),
                columns: Vec::new(),
            })))
        }
    }

    #[tokio::test]
    async fn caches_hits_only() {
        let inner = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
        });
        let loader = CachingTableMetaDataLoader::new(inner.clone());

        loader.load(None, "t_order").await.unwrap();
        loader.load(None, "T_ORDER").await.unwrap();
        assert!(loader.load(None, "missing").await.unwrap().is_none());
        assert!(loader.load(None, "missing").await.unwrap().is_none());

        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(loader.cached_tables(), 1);
    }
}
