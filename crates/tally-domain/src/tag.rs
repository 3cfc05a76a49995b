//! Tag representation for organizing records

use serde::{Deserialize, Serialize};

use crate::record::RecordId;

/// A label attached to contacts or companies via set-valued associations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: RecordId,
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
        }
    }
}
