//! Audit trail for CLI runs.
//!
//! Every [`ExecutionEvent`] published while tasks run is appended to a
//! JSON Lines file, one event per line, for replay or offline analysis.

use std::io::Write;
use std::path::{Path, PathBuf};

use orchestrator::{ExecutionEvent, SharedEventBus};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Append one record as a JSON line. Failures are logged, never fatal.
pub fn append_jsonl<T: Serialize>(record: &T, path: &Path) -> bool {
    let json = match serde_json::to_string(record) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize audit record: {e}");
            return false;
        }
    };
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(mut file) => match writeln!(file, "{json}") {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), "Failed to append audit record: {e}");
                false
            }
        },
        Err(e) => {
            warn!(path = %path.display(), "Failed to open audit log: {e}");
            false
        }
    }
}

/// Subscribe to `events` and append everything to `path` until the bus
/// closes. Returns the number of events written.
pub fn spawn_audit_writer(events: &SharedEventBus, path: PathBuf) -> JoinHandle<usize> {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        let mut written = 0usize;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if append_jsonl::<ExecutionEvent>(&event, &path) {
                        written += 1;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Audit writer lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(path = %path.display(), events = written, "Audit log written");
        written
    })
}
