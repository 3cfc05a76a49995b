//! Dependent records that hold foreign keys to mergeable entities
//!
//! Deals, tasks, and activities reference contacts; contacts and deals
//! reference companies. A merge rewires these references from the losing
//! record to the surviving one.

use serde::{Deserialize, Serialize};

use crate::record::RecordId;

/// A sales deal, optionally attached to a contact and a company.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Deal {
    pub id: RecordId,
    pub name: String,
    pub amount_cents: i64,
    pub contact_id: Option<RecordId>,
    pub company_id: Option<RecordId>,
}

impl Deal {
    pub fn new(name: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            amount_cents,
            contact_id: None,
            company_id: None,
        }
    }

    pub fn for_contact(mut self, contact_id: RecordId) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    pub fn for_company(mut self, company_id: RecordId) -> Self {
        self.company_id = Some(company_id);
        self
    }
}

/// A todo item attached to a contact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: RecordId,
    pub title: String,
    pub contact_id: Option<RecordId>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            title: title.into(),
            contact_id: None,
        }
    }

    pub fn for_contact(mut self, contact_id: RecordId) -> Self {
        self.contact_id = Some(contact_id);
        self
    }
}

/// A timeline entry (note, call, meeting, merge event) on a contact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Activity {
    pub id: RecordId,
    pub activity_type: String,
    pub body: String,
    pub contact_id: Option<RecordId>,
}

impl Activity {
    pub fn new(activity_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            activity_type: activity_type.into(),
            body: body.into(),
            contact_id: None,
        }
    }

    pub fn for_contact(mut self, contact_id: RecordId) -> Self {
        self.contact_id = Some(contact_id);
        self
    }
}
