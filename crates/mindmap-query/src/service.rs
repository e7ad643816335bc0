//! Bounded async front for the engine.
//!
//! Queries and outcome updates run on blocking threads; a semaphore caps
//! how many run at once. Time spent waiting for a worker counts against a
//! query's timeout; a query whose budget runs out in the queue comes back
//! empty and flagged partial. Outcome updates that cannot get a worker are
//! turned away.

use mindmap_core::cancel::CancellationFlag;
use mindmap_core::context::{QueryContext, TaskOutcome};
use mindmap_core::error::ValidationError;
use mindmap_runtime::ingest::{IngestBatch, IngestReport, IngestScheduler};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::engine::{MindmapEngine, OutcomeReport};
use crate::options::QueryOptions;
use crate::response::QueryResponse;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("no worker became free within {0} ms")]
    Overloaded(u64),

    #[error("service is shut down")]
    Closed,

    #[error("worker failed: {0}")]
    Worker(String),
}

#[derive(Clone)]
pub struct QueryService {
    engine: Arc<MindmapEngine>,
    permits: Arc<Semaphore>,
}

impl QueryService {
    /// A service sized by the engine's `service.workers`.
    pub fn new(engine: Arc<MindmapEngine>) -> Self {
        let workers = engine.config().service.workers;
        Self::with_workers(engine, workers)
    }

    pub fn with_workers(engine: Arc<MindmapEngine>, workers: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn engine(&self) -> &Arc<MindmapEngine> {
        &self.engine
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop accepting requests. Running ones finish.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    async fn worker(&self, wait_ms: u64) -> Result<OwnedSemaphorePermit, ServiceError> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        match tokio::time::timeout(Duration::from_millis(wait_ms), acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ServiceError::Closed),
            Err(_) => {
                warn!(wait_ms, "no query worker available");
                Err(ServiceError::Overloaded(wait_ms))
            }
        }
    }

    pub async fn query(&self, text: impl Into<String>, options: QueryOptions) -> Result<QueryResponse, ServiceError> {
        self.query_cancellable(text, options, CancellationFlag::new()).await
    }

    /// Run a query that stops early, flagged partial, once `cancel` is set.
    pub async fn query_cancellable(
        &self,
        text: impl Into<String>,
        options: QueryOptions,
        cancel: CancellationFlag,
    ) -> Result<QueryResponse, ServiceError> {
        options.validate()?;
        let mut options = options;
        let queued = Instant::now();
        let permit = match self.worker(options.timeout_ms).await {
            Ok(permit) => permit,
            Err(ServiceError::Overloaded(waited)) => {
                let version = self.engine.graph_version();
                return Ok(QueryResponse::unstarted("no query worker became free in time", waited, version));
            }
            Err(e) => return Err(e),
        };
        let waited = u64::try_from(queued.elapsed().as_millis()).unwrap_or(u64::MAX);
        if waited >= options.timeout_ms {
            drop(permit);
            let version = self.engine.graph_version();
            return Ok(QueryResponse::unstarted("query budget spent waiting for a worker", waited, version));
        }
        options.timeout_ms -= waited;
        let engine = Arc::clone(&self.engine);
        let text = text.into();
        debug!(query = %text, waited_ms = waited, "query dispatched");
        let task = tokio::task::spawn_blocking(move || {
            let response = engine.query_with_cancel(&text, &options, &cancel);
            drop(permit);
            response
        });
        let response = task.await.map_err(|e| ServiceError::Worker(e.to_string()))??;
        Ok(response)
    }

    pub async fn report_outcome(
        &self,
        outcome: TaskOutcome,
        context: Option<QueryContext>,
    ) -> Result<OutcomeReport, ServiceError> {
        let permit = self.worker(QueryOptions::default().timeout_ms).await?;
        let engine = Arc::clone(&self.engine);
        let task = tokio::task::spawn_blocking(move || {
            let report = engine.report_outcome(&outcome, context.as_ref());
            drop(permit);
            report
        });
        task.await.map_err(|e| ServiceError::Worker(e.to_string()))
    }

    /// Ingest through the engine's chunked scheduler.
    pub async fn ingest(&self, batches: Vec<IngestBatch>) -> IngestReport {
        let scheduler = self.engine.ingest_scheduler();
        self.engine.ingest_batches(&scheduler, batches).await
    }

    /// Ingest through a caller-held scheduler so the caller can cancel it.
    pub async fn ingest_with(&self, scheduler: &IngestScheduler, batches: Vec<IngestBatch>) -> IngestReport {
        self.engine.ingest_batches(scheduler, batches).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::response::Stage;
    use mindmap_core::types::{Edge, EdgeType, Node, NodeType};

    fn service(workers: usize) -> QueryService {
        let engine = MindmapEngine::new(EngineConfig::default()).unwrap();
        engine.add_node(Node::new("router", NodeType::Function, "router")).unwrap();
        engine.add_node(Node::new("handler", NodeType::Function, "handler")).unwrap();
        engine.add_edge(Edge::new("router", "handler", EdgeType::Calls)).unwrap();
        QueryService::with_workers(Arc::new(engine), workers)
    }

    #[tokio::test]
    async fn concurrent_queries_share_workers() {
        let svc = service(2);
        let mut handles = Vec::new();
        for _ in 0..6 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move { svc.query("router", QueryOptions::default()).await }));
        }
        for h in handles {
            let response = h.await.unwrap().unwrap();
            assert_eq!(response.nodes[0].node.id.as_str(), "router");
        }
        assert_eq!(svc.available_workers(), 2);
    }

    #[tokio::test]
    async fn cancelled_query_is_partial() {
        let svc = service(1);
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let response = svc
            .query_cancellable("router", QueryOptions::default(), cancel)
            .await
            .unwrap();
        assert!(response.partial);
        assert!(response.cancelled);
        assert!(!response.cached);
    }

    #[tokio::test]
    async fn invalid_options_and_shutdown() {
        let svc = service(1);
        let err = svc.query("router", QueryOptions::new().with_limit(0)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        svc.shutdown();
        let err = svc.query("router", QueryOptions::default()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Closed));
    }

    #[tokio::test]
    async fn queue_wait_counts_against_the_timeout() {
        let svc = service(1);
        let held = Arc::clone(&svc.permits).acquire_owned().await.unwrap();

        let response = svc.query("router", QueryOptions::new().with_timeout_ms(30)).await.unwrap();
        assert!(response.partial);
        assert!(response.timed_out);
        assert!(response.nodes.is_empty());
        assert!(response.degraded.is_some());
        assert_eq!(response.stages, vec![Stage::Received, Stage::Done]);

        drop(held);
        let response = svc.query("router", QueryOptions::default()).await.unwrap();
        assert!(!response.partial);
        assert!(response.degraded.is_none());
        assert_eq!(svc.available_workers(), 1);
    }

    #[tokio::test]
    async fn outcome_through_service() {
        let svc = service(1);
        let report = svc
            .report_outcome(TaskOutcome::success("wire router").with_file("router").with_file("handler"), None)
            .await
            .unwrap();
        assert_eq!(report.resolved.len(), 2);
        assert!(svc.engine().get_hebbian_stats().total_connections >= 1);
    }
}
