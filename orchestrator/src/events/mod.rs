//! Execution lifecycle events
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ PipelineExecutor │────▶│  Event Bus   │────▶│  Subscribers │
//! │    (publish)     │     │  (broadcast) │     │   (recv)     │
//! └──────────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Every status transition, stage outcome and escalation is published, so
//! an audit log or progress display can follow tasks without touching
//! executor state.

pub mod bus;
pub mod types;

pub use bus::{EventBus, SharedEventBus, TaskReceiver};
pub use types::ExecutionEvent;
