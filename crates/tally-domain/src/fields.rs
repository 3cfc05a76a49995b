//! Typed merge field payloads

use std::collections::BTreeMap;

/// A validated field-name → value payload used for merge planning and the
/// single primary-record update.
///
/// Payloads are built from a record's permitted field list only; empty
/// string means "absent" (scalar fields are never null). Open-ended field
/// bags never cross the merge boundary.
pub type FieldValues = BTreeMap<String, String>;

/// Whether a field carries a value in the given payload.
pub fn field_present(values: &FieldValues, field: &str) -> bool {
    values.get(field).is_some_and(|v| !v.trim().is_empty())
}
