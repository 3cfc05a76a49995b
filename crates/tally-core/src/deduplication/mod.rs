//! Duplicate detection for business records
//!
//! This module provides field normalization, similarity scoring, and the
//! exact-key and fuzzy clustering passes used by scans and pre-submission
//! checks.

mod finder;
mod normalization;
mod similarity;

pub use finder::{
    find_exact_duplicates, find_fuzzy_matches, group_exact_duplicates, group_fuzzy_matches,
    DedupConfig, DuplicateCluster, MatchRecord, ScoredMatch,
};
pub use normalization::{
    normalize_company_name, normalize_email, normalize_name, normalize_phone, normalize_website,
};
pub use similarity::{
    calculate_similarity, is_similar_name, levenshtein_distance, DEFAULT_NAME_THRESHOLD,
};
