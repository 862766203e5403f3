//! Escalation: trigger evaluation and workflow selection
//!
//! Pure, deterministic decision-making. No capability calls happen here;
//! the pipeline executor calls into this module before the first stage and
//! again after every completed stage.
//!
//! ```text
//! ComplexityProfile ─> evaluate(Registry) ─> [Trigger; ordered]
//!                                              │
//!                                              ▼
//!                                   select(matches, Registry) ─> Selection
//! ```

pub mod evaluator;
pub mod selector;

pub use evaluator::{evaluate, top_priority};
pub use selector::{append_missing, select, Selection};
