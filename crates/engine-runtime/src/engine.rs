use crate::error::TaskError;
use std::{future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Completion handle of one task worker.
pub type TaskHandle = JoinHandle<Result<(), TaskError>>;

/// Runs task workers on the tokio runtime.
#[derive(Debug, Clone)]
pub struct ExecuteEngine {
    name: Arc<str>,
}

impl ExecuteEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns `future` as worker `worker`, logging how it ended.
    pub fn submit<F>(&self, worker: impl Into<String>, future: F) -> TaskHandle
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let engine = self.name.clone();
        let worker = worker.into();

        tokio::spawn(async move {
            debug!(engine = %engine, worker = %worker, "Worker started");
            let result = future.await;
            match &result {
                Ok(()) => debug!(engine = %engine, worker = %worker, "Worker finished"),
                Err(e) => error!(engine = %engine, worker = %worker, error = %e, "Worker failed"),
            }
            result
        })
    }
}

impl Default for ExecuteEngine {
    fn default() -> Self {
        Self::new("pipeline")
    }
}

/// Waits for every handle and returns the first failure.
pub async fn await_all(handles: Vec<TaskHandle>) -> Result<(), TaskError> {
    let mut first_error = None;
    for handle in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join) => Err(TaskError::Join(join.to_string())),
        };
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn submit_reports_worker_result() {
        let engine = ExecuteEngine::new("test");
        let ok = engine.submit("ok", async { Ok(()) });
        let failed = engine.submit("broken", async { Err(TaskError::Stopped("t".into())) });

        assert!(ok.await.unwrap().is_ok());
        assert!(matches!(failed.await.unwrap(), Err(TaskError::Stopped(_))));
        assert!(logs_contain("Worker failed"));
    }

    #[tokio::test]
    async fn await_all_keeps_first_error() {
        let engine = ExecuteEngine::default();
        let handles = vec![
            engine.submit("a", async { Ok(()) }),
            engine.submit("b", async { Err(TaskError::AlreadyStarted("b".into())) }),
            engine.submit("c", async { Err(TaskError::Stopped("c".into())) }),
        ];

        let err = await_all(handles).await.unwrap_err();
        assert!(matches!(err, TaskError::AlreadyStarted(id) if id == "b"));
    }

    #[tokio::test]
    async fn await_all_maps_panics() {
        let engine = ExecuteEngine::default();
        let handles = vec![engine.submit("panics", async {
            let broken = true;
            if broken {
                panic!("boom");
            }
            Ok(())
        })];

        assert!(matches!(await_all(handles).await, Err(TaskError::Join(_))));
    }
}
