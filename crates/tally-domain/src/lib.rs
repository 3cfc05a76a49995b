//! Business-record domain types shared across the tally suite
//!
//! This crate provides the canonical domain models for business-record
//! management:
//! - Contact, Company: the two mergeable entity types
//! - Deal, Task, Activity: dependent records that reference them
//! - Tag: organization labels with set-valued associations
//! - FieldValues, MergeDecision, MergeAudit: the merge vocabulary
//! - EntityKind, RecordState: entity typing and lifecycle

pub mod company;
pub mod contact;
pub mod dependent;
pub mod fields;
pub mod merge;
pub mod record;
pub mod tag;

pub use company::*;
pub use contact::*;
pub use dependent::*;
pub use fields::*;
pub use merge::*;
pub use record::*;
pub use tag::*;
