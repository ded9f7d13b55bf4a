use super::item::JobItemContext;
use crate::{
    error::{ProgressError, RepositoryError},
    node_path,
    repository::PersistRepository,
};
use model::{core::identifiers::TaskId, position::Position};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keeps the acknowledged progress of job items in the coordination store,
/// so a restarted item resumes instead of copying its data again.
///
/// Positions are stored in their text form, one key per incremental stream
/// and one per inventory split.
#[derive(Clone)]
pub struct JobItemProgressPersistService {
    repository: Arc<dyn PersistRepository>,
}

impl JobItemProgressPersistService {
    pub fn new(repository: Arc<dyn PersistRepository>) -> Self {
        Self { repository }
    }

    /// Writes the current progress of `context`.
    pub async fn persist(&self, context: &JobItemContext) -> Result<(), RepositoryError> {
        self.persist_changed(context, &mut HashMap::new()).await
    }

    /// Writes the entries of `context` whose text differs from `written`.
    async fn persist_changed(
        &self,
        context: &JobItemContext,
        written: &mut HashMap<String, String>,
    ) -> Result<(), RepositoryError> {
        let job_id = context.job_id().as_str();
        let item = context.sharding_item();
        let inventory_path = node_path::job_item_inventory_path(job_id, item);

        let mut entries = vec![(
            node_path::job_item_incremental_path(job_id, item),
            context.incremental_progress(),
        )];
        entries.extend(
            context
                .inventory_progresses()
                .into_iter()
                .map(|(task_id, position)| (format!("{inventory_path}/{task_id}"), position)),
        );

        for (key, position) in entries {
            let text = position.to_string();
            if written.get(&key) == Some(&text) {
                continue;
            }
            self.repository.persist(&key, &text).await?;
            written.insert(key, text);
        }
        Ok(())
    }

    /// Loads the stored progress of `context`'s item into it. Returns whether
    /// anything was stored.
    pub async fn load_into(&self, context: &JobItemContext) -> Result<bool, ProgressError> {
        let job_id = context.job_id().as_str();
        let item = context.sharding_item();
        let mut found = false;

        let incremental_path = node_path::job_item_incremental_path(job_id, item);
        if let Some(position) = self.load_position(&incremental_path).await? {
            context.restore_incremental_progress(position);
            found = true;
        }

        let inventory_path = node_path::job_item_inventory_path(job_id, item);
        for task_id in self.repository.get_children_keys(&inventory_path).await? {
            let key = format!("{inventory_path}/{task_id}");
            if let Some(position) = self.load_position(&key).await? {
                context.advance_inventory_progress(&TaskId::new(task_id), position);
                found = true;
            }
        }

        if found {
            info!(
                job_id = %job_id,
                sharding_item = item,
                incremental = %context.incremental_progress(),
                inventory_splits = context.inventory_progresses().len(),
                "Restored job item progress"
            );
        }
        Ok(found)
    }

    async fn load_position(&self, key: &str) -> Result<Option<Position>, ProgressError> {
        let Some(text) = self.repository.get(key).await? else {
            return Ok(None);
        };
        text.parse()
            .map(Some)
            .map_err(|source| ProgressError::Invalid {
                key: key.to_string(),
                source,
            })
    }

    /// Persists `context` whenever its progress changes, and once more after
    /// `cancel` fires. Write failures are logged and retried on the next change.
    pub async fn persist_on_change(&self, context: Arc<JobItemContext>, cancel: CancellationToken) {
        let mut changes = context.subscribe_progress_changes();
        let mut written = HashMap::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if let Err(e) = self.persist_changed(&context, &mut written).await {
                warn!(job_id = %context.job_id(), sharding_item = context.sharding_item(), error = %e, "Failed to persist job item progress");
            }
        }

        match self.persist_changed(&context, &mut written).await {
            Ok(()) => debug!(job_id = %context.job_id(), sharding_item = context.sharding_item(), "Flushed job item progress"),
            Err(e) => warn!(job_id = %context.job_id(), sharding_item = context.sharding_item(), error = %e, "Failed to flush job item progress"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryClusterRepository;
    use model::core::identifiers::JobId;
    use std::time::Duration;

    fn context() -> JobItemContext {
        JobItemContext::new(JobId::new("j0102abc"), 1)
    }

    fn service(repo: &MemoryClusterRepository) -> JobItemProgressPersistService {
        JobItemProgressPersistService::new(Arc::new(repo.clone()))
    }

    #[tokio::test]
    async fn restarted_item_gets_stored_progress() {
        let repo = MemoryClusterRepository::new();
        let running = context();
        running.advance_incremental_progress(Position::Wal { lsn: 0x16_0000_0010 });
        running.advance_inventory_progress(&TaskId::new("ds_0.t_order_0#0"), Position::Finished);
        running.advance_inventory_progress(
            &TaskId::new("ds_0.t_order_0#1"),
            Position::IntegerPrimaryKey { begin: 14, end: 20 },
        );
        service(&repo).persist(&running).await.unwrap();

        assert_eq!(
            repo.get("/pipeline/jobs/j0102abc/items/1/incremental").await.unwrap(),
            Some("wal:16/10".to_string())
        );

        let restarted = context();
        assert!(service(&repo).load_into(&restarted).await.unwrap());
        assert_eq!(restarted.incremental_progress(), running.incremental_progress());
        assert_eq!(restarted.inventory_progresses(), running.inventory_progresses());
    }

    #[tokio::test]
    async fn nothing_stored_leaves_context_untouched() {
        let repo = MemoryClusterRepository::new();
        let ctx = context();

        assert!(!service(&repo).load_into(&ctx).await.unwrap());
        assert!(ctx.incremental_progress().is_placeholder());
        assert!(ctx.inventory_progresses().is_empty());
    }

    #[tokio::test]
    async fn garbled_progress_is_rejected() {
        let repo = MemoryClusterRepository::new();
        repo.persist("/pipeline/jobs/j0102abc/items/1/incremental", "wal:nope")
            .await
            .unwrap();

        let err = service(&repo).load_into(&context()).await.unwrap_err();
        assert!(matches!(
            err,
            ProgressError::Invalid { key, .. } if key == "/pipeline/jobs/j0102abc/items/1/incremental"
        ));
    }

    #[tokio::test]
    async fn acknowledged_progress_is_written_as_it_moves() {
        let repo = MemoryClusterRepository::new();
        let ctx = Arc::new(context());
        let cancel = CancellationToken::new();
        let persister = tokio::spawn({
            let service = service(&repo);
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            async move { service.persist_on_change(ctx, cancel).await }
        });
        let key = "/pipeline/jobs/j0102abc/items/1/incremental";

        ctx.advance_incremental_progress(Position::Wal { lsn: 3 });
        tokio::time::timeout(Duration::from_secs(5), async {
            while repo.get(key).await.unwrap().as_deref() != Some("wal:0/3") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("progress not persisted");

        ctx.advance_inventory_progress(&TaskId::new("ds_0.t_order_0#0"), Position::Finished);
        cancel.cancel();
        persister.await.unwrap();

        assert_eq!(
            repo.get("/pipeline/jobs/j0102abc/items/1/inventory/ds_0.t_order_0#0")
                .await
                .unwrap(),
            Some("finished".to_string())
        );
    }
}
