//! Similarity scoring for duplicate detection

use super::normalization::normalize_company_name;

/// Default threshold for considering two names duplicates.
pub const DEFAULT_NAME_THRESHOLD: f64 = 0.8;

/// Classic dynamic-programming edit distance over characters.
///
/// Uses two rolling rows, so space is O(len(b)) while time stays
/// O(len(a) * len(b)).
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1)
                .min(curr[j] + 1)
                .min(prev[j] + substitution);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Similarity in [0, 1] between two names.
///
/// Both sides are normalized via [`normalize_company_name`] first, so
/// "Acme Inc" and "Acme Corp" compare as equal.
pub fn calculate_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_company_name(a);
    let b = normalize_company_name(b);
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein_distance(&a, &b);
    (1.0 - distance as f64 / max_len as f64).clamp(0.0, 1.0)
}

/// Whether two names score at or above the given threshold.
pub fn is_similar_name(a: &str, b: &str, threshold: f64) -> bool {
    calculate_similarity(a, b) >= threshold
}
