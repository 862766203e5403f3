//! `plan` and `run` subcommands.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use orchestrator::{
    CapabilityHealth, CapabilityTable, ExecutionState, ExecutionStatus, HttpCapability,
    OrchestratorConfig, PipelineExecutor, Registry, ResilienceManager, SharedRegistry,
    TaskDescription, TaskHandle, WorkerPool,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::args::{split_pair, PlanArgs, RunArgs, TaskArgs};
use crate::telemetry::spawn_audit_writer;

/// Dry-run output for one task.
#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub task_id: String,
    pub profile: orchestrator::ComplexityProfile,
    pub template: String,
    pub matched_domains: Vec<String>,
    pub max_escalations: u32,
    pub stages: Vec<orchestrator::StageSpec>,
}

impl From<ExecutionState> for PlanReport {
    fn from(state: ExecutionState) -> Self {
        Self {
            task_id: state.task.id,
            profile: state.profile,
            template: state.template.id,
            matched_domains: state.matched_domains,
            max_escalations: state.template.max_escalations,
            stages: state.template.stages,
        }
    }
}

/// Output of `run`: every terminal task state plus the health of each
/// capability that was called.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub tasks: Vec<ExecutionState>,
    pub capabilities: Vec<CapabilityHealth>,
}

/// Process exit code for a batch of terminal states: 0 when all completed,
/// 1 when any failed, 2 when some were cancelled (Ctrl-C) and none failed.
pub fn exit_code(states: &[ExecutionState]) -> i32 {
    if states.iter().any(|s| s.status == ExecutionStatus::Failed) {
        1
    } else if states.iter().any(|s| s.status == ExecutionStatus::Cancelled) {
        2
    } else {
        0
    }
}

/// Collect tasks from positional arguments and the optional JSONL file.
/// Positional tasks get ordinal ids (`task-1`, `task-2`, ...).
pub fn load_tasks(args: &TaskArgs) -> Result<Vec<TaskDescription>> {
    let mut tasks: Vec<TaskDescription> = args
        .tasks
        .iter()
        .enumerate()
        .map(|(i, text)| TaskDescription::new(text.as_str()).with_id(format!("task-{}", i + 1)))
        .collect();

    if let Some(path) = &args.tasks_file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading tasks file {}", path.display()))?;
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let task: TaskDescription = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid task", path.display(), line_no + 1))?;
            tasks.push(task);
        }
    }

    if tasks.is_empty() {
        bail!("no tasks given: pass TASK arguments or --tasks-file");
    }

    for pair in &args.hints {
        if split_pair(pair).is_none() {
            bail!("invalid --hint '{pair}': expected key=value");
        }
    }
    Ok(tasks
        .into_iter()
        .map(|task| task.with_hint_pairs(args.hints.iter().map(String::as_str)))
        .collect())
}

pub fn load_registry(path: &Path) -> Result<Registry> {
    let registry = Registry::from_path(path)
        .with_context(|| format!("loading registry from {}", path.display()))?;
    info!(path = %path.display(), summary = %registry.summary(), "Registry loaded");
    Ok(registry)
}

/// Build the capability table from `name=url` pairs.
pub fn capability_table(pairs: &[String]) -> Result<CapabilityTable> {
    let mut table = CapabilityTable::new();
    for raw in pairs {
        let Some((name, url)) = split_pair(raw) else {
            bail!("invalid --capability '{raw}': expected name=url");
        };
        table.insert(name, Arc::new(HttpCapability::new(name, url)));
    }
    Ok(table)
}

pub fn plan(args: &PlanArgs) -> Result<Vec<PlanReport>> {
    let registry = Arc::new(load_registry(&args.task.registry)?);
    let executor = PipelineExecutor::new(
        registry,
        Arc::new(ResilienceManager::new(CapabilityTable::new(), Default::default())),
    );
    Ok(load_tasks(&args.task)?
        .into_iter()
        .map(|task| PlanReport::from(executor.plan(task)))
        .collect())
}

/// Cancel every token once `signal` resolves.
pub fn cancel_on<F>(signal: F, tokens: Vec<CancellationToken>) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        warn!(tasks = tokens.len(), "Interrupted, cancelling tasks");
        for token in &tokens {
            token.cancel();
        }
    })
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C; tasks can only finish on their own");
        std::future::pending::<()>().await;
    }
}

pub async fn run(args: &RunArgs) -> Result<RunReport> {
    let registry = load_registry(&args.task.registry)?;
    let tasks = load_tasks(&args.task)?;
    let capabilities = capability_table(&args.capabilities)?;

    let missing: Vec<String> = registry
        .templates()
        .flat_map(|t| t.stages.iter())
        .map(|s| s.required_capability.clone())
        .filter(|c| !capabilities.contains(c))
        .map(|c| c.to_string())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    if !missing.is_empty() {
        warn!(missing = ?missing, "Capabilities referenced by templates are not configured");
    }

    let mut config = OrchestratorConfig::default();
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(secs) = args.task_timeout {
        config = config.with_task_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }

    let pool = WorkerPool::with_defaults(
        config,
        Arc::new(SharedRegistry::new(registry)),
        capabilities,
    );
    let audit = args
        .audit_log
        .as_ref()
        .map(|path| spawn_audit_writer(pool.events(), path.clone()));

    let handles = tasks
        .into_iter()
        .map(|task| pool.submit(task))
        .collect::<Result<Vec<_>, _>>()
        .context("submitting tasks")?;
    let interrupt = cancel_on(
        interrupted(),
        handles.iter().map(TaskHandle::cancellation_token).collect(),
    );

    let mut states = Vec::with_capacity(handles.len());
    for handle in handles {
        let id = handle.id().to_string();
        let state = handle
            .wait()
            .await
            .with_context(|| format!("waiting for task {id}"))?;
        info!(summary = %state.summary(), "Task finished");
        states.push(state);
    }
    interrupt.abort();

    pool.shutdown().await;
    let capabilities = pool.resilience().health_report();
    for health in &capabilities {
        info!(
            capability = %health.capability,
            level = %health.level,
            calls = health.total_calls,
            failure_rate = health.failure_rate(),
            "Capability health"
        );
    }
    drop(pool);
    if let Some(audit) = audit {
        let written = audit.await.context("audit writer panicked")?;
        info!(events = written, "Audit trail complete");
    }
    Ok(RunReport {
        tasks: states,
        capabilities,
    })
}
