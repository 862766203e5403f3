//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Complexity-triggered workflow orchestrator
#[derive(Parser, Debug)]
#[command(name = "orchestrate", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract signals and select a workflow without running it
    Plan(PlanArgs),
    /// Run tasks through the worker pool against HTTP capabilities
    Run(RunArgs),
}

/// Arguments shared by every subcommand that takes tasks.
#[derive(Args, Debug, Clone)]
pub struct TaskArgs {
    /// Registry definition (.toml, .yaml, .yml or .json)
    #[arg(long, short = 'r')]
    pub registry: PathBuf,

    /// Hint applied to every task, as key=value (repeatable)
    #[arg(long = "hint", value_name = "KEY=VALUE")]
    pub hints: Vec<String>,

    /// JSON Lines file of tasks ({"id", "text", "hints"}) in addition to TASK arguments
    #[arg(long)]
    pub tasks_file: Option<PathBuf>,

    /// Task text (one task per argument)
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub task: TaskArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Capability endpoint as name=url (repeatable)
    #[arg(long = "capability", short = 'c', value_name = "NAME=URL")]
    pub capabilities: Vec<String>,

    /// Concurrently running tasks (overrides ORCH_WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Global per-task timeout in seconds, 0 disables (overrides ORCH_TASK_TIMEOUT_SECS)
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// Append every execution event to this JSON Lines file
    #[arg(long)]
    pub audit_log: Option<PathBuf>,
}

/// Split `name=value`, trimming both sides. Empty names or values are rejected.
pub fn split_pair(raw: &str) -> Option<(&str, &str)> {
    let (name, value) = raw.split_once('=')?;
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() || value.is_empty() {
        None
    } else {
        Some((name, value))
    }
}
