//! Company domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fields::FieldValues;
use crate::record::RecordId;

/// An organization record.
///
/// Same conventions as [`crate::Contact`]: empty string means absent,
/// `is_merged` is monotonic and terminal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Company {
    pub id: RecordId,
    pub name: String,
    pub website: String,
    pub phone: String,
    pub industry: String,
    pub address: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub is_merged: bool,
}

impl Company {
    /// Fields a merge decision may cover for companies.
    pub const MERGE_FIELDS: &'static [&'static str] =
        &["address", "industry", "name", "phone", "website"];

    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            website: String::new(),
            phone: String::new(),
            industry: String::new(),
            address: String::new(),
            owner: owner.into(),
            created_at: Utc::now(),
            is_merged: false,
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = website.into();
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = industry.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Look up a mergeable field by name. Unknown names return `None`.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "address" => Some(&self.address),
            "industry" => Some(&self.industry),
            "name" => Some(&self.name),
            "phone" => Some(&self.phone),
            "website" => Some(&self.website),
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
                    "address" => self.address = value.clone(),
                    "industry" => self.industry = value.clone(),
                    "name" => self.name = value.clone(),
                    "phone" => self.phone = value.clone(),
                    "website" => self.website = value.clone(),
                    _ => unreachable!(),
                }
            }
        }
    }
}
