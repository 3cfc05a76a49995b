//! Engine error taxonomy

use tally_domain::RecordId;
use tally_store::StoreError;

/// Errors surfaced by merge planning and execution.
///
/// `execute_merge` never swallows errors: every failure names the failing
/// step and rolls the transaction back completely. The pre-submission
/// candidate check is the only degrading path, and it logs a warning
/// instead of returning one of these.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Self-merge attempt, merging an already-merged record, or a
    /// malformed decision map.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Primary or duplicate identity does not resolve.
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    /// A concurrent merge flagged one of the two records inside the
    /// transaction window.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Pass-through failure from the storage collaborator, including
    /// transaction abort.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}
