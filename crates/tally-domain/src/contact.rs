//! Contact domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fields::FieldValues;
use crate::record::RecordId;

/// A person record.
///
/// Scalar fields hold the empty string when absent. `is_merged` is
/// monotonic: once set, the contact is excluded from scans and can never
/// again be a merge primary or duplicate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub id: RecordId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub title: String,
    pub company_id: Option<RecordId>,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub is_merged: bool,
}

impl Contact {
    /// Fields a merge decision may cover for contacts.
    pub const MERGE_FIELDS: &'static [&'static str] = &["email", "name", "phone", "title"];

    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            email: String::new(),
            phone: String::new(),
            title: String::new(),
            company_id: None,
            owner: owner.into(),
            created_at: Utc::now(),
            is_merged: false,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_company(mut self, company_id: RecordId) -> Self {
        self.company_id = Some(company_id);
        self
    }

    /// Look up a mergeable field by name. Unknown names return `None`.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "email" => Some(&self.email),
            "name" => Some(&self.name),
            "phone" => Some(&self.phone),
            "title" => Some(&self.title),
            _ => None,
        }
    }

    /// Snapshot the mergeable fields into a payload.
    pub fn field_values(&self) -> FieldValues {
        Self::MERGE_FIELDS
            .iter()
            .filter_map(|f| self.field(f).map(|v| (f.to_string(), v.to_string())))
            .collect()
    }

    /// Apply a resolved payload. Only permitted fields are touched.
    pub fn apply_fields(&mut self, values: &FieldValues) {
        for field in Self::MERGE_FIELDS {
            if let Some(value) = values.get(*field) {
                match *field {
                    "email" => self.email = value.clone(),
                    "name" => self.name = value.clone(),
                    "phone" => self.phone = value.clone(),
                    "title" => self.title = value.clone(),
                    _ => unreachable!(),
                }
            }
        }
    }
}
