//! Worker Pool: bounded concurrent execution of many tasks.
//!
//! ```text
//! submit(task) ─> TaskHandle { id, status (watch), cancel, wait }
//!      │
//!      ▼
//!  tokio::spawn ─> PipelineExecutor::run(task) ─> terminal state ─> oneshot
//!                    ├─ waits for a worker permit (`workers` permits)
//!                    ├─ cancelled while queued ─> Cancelled
//!                    └─ permit handed back around every capability call
//! ```
//!
//! `workers` bounds how many tasks are actively running; a task suspended
//! on a capability holds no permit, so slow providers never starve the
//! queue. Each task pins the registry snapshot current at submission, so a
//! reload never changes the plan of an in-flight task. Stages within one
//! task always run sequentially; only whole tasks run in parallel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::capability::CapabilityTable;
use crate::config::OrchestratorConfig;
use crate::events::{EventBus, SharedEventBus};
use crate::pipeline::{ExecutionState, ExecutionStatus, PipelineExecutor};
use crate::registry::SharedRegistry;
use crate::resilience::ResilienceManager;
use crate::signals::TaskDescription;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// `shutdown` was called; no new submissions are accepted
    #[error("worker pool is shutting down")]
    ShuttingDown,

    /// The worker running the task stopped without reporting a result
    #[error("worker for task '{task_id}' exited without a result")]
    WorkerLost { task_id: String },
}

/// Caller-side handle to one submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    cancel: CancellationToken,
    status: watch::Receiver<ExecutionStatus>,
    result: oneshot::Receiver<ExecutionState>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request cancellation. Takes effect at the task's next suspension
    /// boundary; a no-op once the task is terminal.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this task, usable after `wait` has taken the handle.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest observed status.
    pub fn status(&self) -> ExecutionStatus {
        *self.status.borrow()
    }

    /// Receiver for status changes, for callers that want to follow progress.
    pub fn watch_status(&self) -> watch::Receiver<ExecutionStatus> {
        self.status.clone()
    }

    /// Wait for the terminal state.
    pub async fn wait(self) -> Result<ExecutionState, PoolError> {
        self.result
            .await
            .map_err(|_| PoolError::WorkerLost { task_id: self.id })
    }
}

/// Runs submitted tasks with at most `config.workers` actively running at
/// once. Suspended tasks do not count against the limit.
pub struct WorkerPool {
    config: OrchestratorConfig,
    registry: Arc<SharedRegistry>,
    resilience: Arc<ResilienceManager>,
    events: SharedEventBus,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    accepting: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<SharedRegistry>,
        capabilities: CapabilityTable,
        events: SharedEventBus,
    ) -> Self {
        let workers = config.workers.max(1);
        let resilience = Arc::new(ResilienceManager::new(capabilities, config.retry.clone()));
        info!(
            workers,
            capabilities = resilience.capabilities().len(),
            task_timeout_secs = ?config.task_timeout_secs,
            "Worker pool started"
        );
        Self {
            config,
            registry,
            resilience,
            events,
            permits: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Pool with its own event bus.
    pub fn with_defaults(
        config: OrchestratorConfig,
        registry: Arc<SharedRegistry>,
        capabilities: CapabilityTable,
    ) -> Self {
        Self::new(config, registry, capabilities, EventBus::new().shared())
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn resilience(&self) -> &Arc<ResilienceManager> {
        &self.resilience
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Tasks submitted but not yet terminal.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Queue a task. Must be called within a Tokio runtime.
    pub fn submit(&self, task: TaskDescription) -> Result<TaskHandle, PoolError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }

        let id = task.id.clone();
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Pending);
        let (result_tx, result_rx) = oneshot::channel();

        let executor = PipelineExecutor::new(self.registry.current(), Arc::clone(&self.resilience))
            .with_events(Arc::clone(&self.events))
            .with_task_timeout(self.config.task_timeout())
            .with_cancellation(cancel.clone())
            .with_status_channel(status_tx)
            .with_worker_permits(Arc::clone(&self.permits));

        debug!(task_id = %id, "Task queued");
        self.tracker.spawn(async move {
            let state = executor.run(task).await;
            // The caller may have dropped its handle; the state is discarded then.
            let _ = result_tx.send(state);
        });

        Ok(TaskHandle {
            id,
            cancel,
            status: status_rx,
            result: result_rx,
        })
    }

    /// Stop accepting submissions and wait for every in-flight task.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.tracker.close();
        info!(in_flight = self.tracker.len(), "Worker pool shutting down");
        self.tracker.wait().await;
        info!("Worker pool stopped");
    }
}
