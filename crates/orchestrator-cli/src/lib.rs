//! Command-line front end for the orchestrator.
//!
//! ```bash
//! # Show which workflow a task would get
//! orchestrate plan -r registry.toml "Migrate the auth service to OAuth"
//!
//! # Run tasks against HTTP capabilities
//! ORCH_WORKERS=8 orchestrate run -r registry.toml \
//!     -c semantic=http://localhost:7001/invoke \
//!     -c reasoning=http://localhost:7002/invoke \
//!     --audit-log audit.jsonl "Fix flaky login test"
//! ```
//!
//! `run` prints every terminal task state and a health summary per
//! capability. Ctrl-C cancels the submitted tasks: calls already in flight
//! finish, nothing new starts.
//!
//! Exit codes for `run`: 0 all tasks completed, 1 any failed, 2 any
//! cancelled (and none failed).

pub mod args;
pub mod commands;
pub mod telemetry;
