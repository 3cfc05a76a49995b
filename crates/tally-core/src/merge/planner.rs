//! Per-field merge resolution

use tally_domain::{field_present, EntityKind, FieldValues, MergeDecision, MergeSource};

use crate::error::MergeError;

/// Propose a resolution for every permitted field of the entity kind.
///
/// Default rule: a side with a value beats a side without one; when both
/// sides have a value (or neither does), the primary wins. Callers may
/// flip any individual field before executing.
pub fn plan_merge(
    kind: EntityKind,
    primary: &FieldValues,
    duplicate: &FieldValues,
) -> MergeDecision {
    let mut decision = MergeDecision::new();
    for field in kind.merge_fields() {
        let source = if !field_present(primary, field) && field_present(duplicate, field) {
            MergeSource::Duplicate
        } else {
            MergeSource::Primary
        };
        decision.set(*field, source);
    }
    decision
}

/// Reject decisions carrying unknown fields or missing permitted ones.
///
/// This is the boundary that keeps system fields (id, owner, created_at,
/// is_merged) and arbitrary keys out of merge payloads.
pub fn validate_decision(decision: &MergeDecision, kind: EntityKind) -> Result<(), MergeError> {
    let permitted = kind.merge_fields();
    for (field, _) in decision.fields() {
        if !permitted.contains(&field) {
            return Err(MergeError::Validation(format!(
                "unknown field in merge decision for {}: {}",
                kind, field
            )));
        }
    }
    for field in permitted {
        if decision.source_for(field).is_none() {
            return Err(MergeError::Validation(format!(
                "merge decision for {} missing field: {}",
                kind, field
            )));
        }
    }
    Ok(())
}

/// Resolve a decision into the payload that will be written to the primary.
pub fn resolve_decision(
    decision: &MergeDecision,
    primary: &FieldValues,
    duplicate: &FieldValues,
) -> FieldValues {
    decision
        .fields()
        .map(|(field, source)| {
            let side = match source {
                MergeSource::Primary => primary,
                MergeSource::Duplicate => duplicate,
            };
            (field.to_string(), side.get(field).cloned().unwrap_or_default())
        })
        .collect()
}
