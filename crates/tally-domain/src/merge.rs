//! Merge decision and audit vocabulary

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fields::FieldValues;
use crate::record::{EntityKind, RecordId};

/// Which record's value survives for a given field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeSource {
    Primary,
    Duplicate,
}

/// A fully populated field-name → source mapping.
///
/// The planner produces one covering every permitted field of the entity
/// kind; callers may flip individual fields before executing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeDecision {
    choices: BTreeMap<String, MergeSource>,
}

impl MergeDecision {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or override) the source for a field.
    pub fn set(&mut self, field: impl Into<String>, source: MergeSource) {
        self.choices.insert(field.into(), source);
    }

    pub fn source_for(&self, field: &str) -> Option<MergeSource> {
        self.choices.get(field).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, MergeSource)> {
        self.choices.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

/// Immutable record of an executed merge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeAudit {
    pub id: RecordId,
    pub entity_kind: EntityKind,
    pub primary_id: RecordId,
    pub duplicate_id: RecordId,
    pub actor: String,
    pub merged_at: DateTime<Utc>,
    /// The resolved field payload that was written to the primary.
    pub field_snapshot: FieldValues,
}

impl MergeAudit {
    pub fn new(
        entity_kind: EntityKind,
        primary_id: RecordId,
        duplicate_id: RecordId,
        actor: impl Into<String>,
        field_snapshot: FieldValues,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            entity_kind,
            primary_id,
            duplicate_id,
            actor: actor.into(),
            merged_at: Utc::now(),
            field_snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_override() {
        let mut decision = MergeDecision::new();
        decision.set("name", MergeSource::Primary);
        decision.set("name", MergeSource::Duplicate);
        assert_eq!(decision.source_for("name"), Some(MergeSource::Duplicate));
        assert_eq!(decision.len(), 1);
    }

    #[test]
    fn test_audit_records_both_identities() {
        let primary = uuid::Uuid::new_v4();
        let duplicate = uuid::Uuid::new_v4();
        let audit = MergeAudit::new(
            EntityKind::Contact,
            primary,
            duplicate,
            "alice",
            FieldValues::new(),
        );
        assert_eq!(audit.primary_id, primary);
        assert_eq!(audit.duplicate_id, duplicate);
        assert_eq!(audit.entity_kind, EntityKind::Contact);
    }
}
