//! Merge planning and execution
//!
//! The planner proposes a per-field resolution a human may override; the
//! executor applies a confirmed decision atomically, rewires dependent
//! records, unions tags, soft-deletes the duplicate, and writes the audit
//! trail. The executor is the only component in the engine with write side
//! effects.

mod executor;
mod planner;

pub use executor::{MergeExecutor, NullTimeline, TimelineError, TimelineSink};
pub use planner::{plan_merge, resolve_decision, validate_decision};
