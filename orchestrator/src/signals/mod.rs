//! Signals: structured complexity measurement for incoming tasks
//!
//! The extractor is the only place task text is inspected. Everything
//! downstream (trigger evaluation, selection, escalation) works on the
//! [`ComplexityProfile`] alone.

pub mod extractor;
pub mod profile;

pub use extractor::{extract, SignalExtractor};
pub use profile::{ComplexityProfile, Severity, SurfacedSignals, TaskDescription};
