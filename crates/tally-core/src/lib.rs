//! tally-core: duplicate detection and merge reconciliation for business records
//!
//! This library provides the one algorithmically interesting subsystem of the
//! tally record manager:
//! - Field normalization (email, name, website, phone, company name)
//! - Similarity scoring via edit distance
//! - Exact-key and fuzzy duplicate clustering
//! - Per-field merge planning with human override
//! - Atomic, relationship-aware merge execution with an audit trail
//!
//! Persistence is consumed through the `tally-store` collaborator traits;
//! the engine itself holds no global state and performs no I/O outside the
//! injected store handle.

pub mod deduplication;
pub mod engine;
pub mod error;
pub mod merge;

// Re-export the main types for convenience
pub use deduplication::{
    calculate_similarity, find_exact_duplicates, find_fuzzy_matches, group_exact_duplicates,
    group_fuzzy_matches, is_similar_name, levenshtein_distance, normalize_company_name,
    normalize_email, normalize_name, normalize_phone, normalize_website, DedupConfig,
    DuplicateCluster, MatchRecord, ScoredMatch, DEFAULT_NAME_THRESHOLD,
};
pub use engine::{CandidateCheck, DedupEngine, ScanReport, ScoredRecord};
pub use error::MergeError;
pub use merge::{
    plan_merge, resolve_decision, validate_decision, MergeExecutor, NullTimeline, TimelineError,
    TimelineSink,
};
