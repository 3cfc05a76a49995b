//! Entity typing and lifecycle

use serde::{Deserialize, Serialize};

use crate::company::Company;
use crate::contact::Contact;
use crate::fields::FieldValues;

/// Stable identity of any record in the system.
pub type RecordId = uuid::Uuid;

/// The two entity types that participate in duplicate detection and merging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Contact,
    Company,
}

impl EntityKind {
    /// Fields that may appear in a merge decision for this kind.
    ///
    /// Identity, ownership, creation timestamp, and the merge flag are
    /// excluded by construction; a decision can never touch them.
    pub fn merge_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Contact => Contact::MERGE_FIELDS,
            EntityKind::Company => Company::MERGE_FIELDS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Company => "company",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a record.
///
/// `UnderReview` is advisory only: it is derived by callers when a scan or
/// pre-submission check flags the record, and is never persisted. `Merged`
/// is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Active,
    UnderReview,
    Merged,
}

impl RecordState {
    pub fn of(is_merged: bool, flagged: bool) -> Self {
        if is_merged {
            RecordState::Merged
        } else if flagged {
            RecordState::UnderReview
        } else {
            RecordState::Active
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordState::Merged)
    }
}

/// A mergeable record of either kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Contact(Contact),
    Company(Company),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Contact(_) => EntityKind::Contact,
            Record::Company(_) => EntityKind::Company,
        }
    }

    pub fn id(&self) -> RecordId {
        match self {
            Record::Contact(c) => c.id,
            Record::Company(c) => c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Record::Contact(c) => &c.name,
            Record::Company(c) => &c.name,
        }
    }

    pub fn is_merged(&self) -> bool {
        match self {
            Record::Contact(c) => c.is_merged,
            Record::Company(c) => c.is_merged,
        }
    }

    /// Look up a mergeable field by name. Unknown names return `None`.
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            Record::Contact(c) => c.field(name),
            Record::Company(c) => c.field(name),
        }
    }

    pub fn field_values(&self) -> FieldValues {
        match self {
            Record::Contact(c) => c.field_values(),
            Record::Company(c) => c.field_values(),
        }
    }
}
