//! Exact-key and fuzzy duplicate finding
//!
//! All functions operate over a caller-supplied collection that is already
//! filtered (non-merged, owner-scoped). Single-candidate lookups are O(n);
//! the collection-wide fuzzy pass is O(n²).

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use tally_domain::{Company, Contact, Record, RecordId};

use super::normalization::normalize_company_name;
use super::similarity::{calculate_similarity, DEFAULT_NAME_THRESHOLD};

/// Configuration for duplicate detection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Minimum name similarity for fuzzy matches (0.0 - 1.0)
    pub name_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            name_threshold: DEFAULT_NAME_THRESHOLD,
        }
    }
}

/// A record the finder can compare.
pub trait MatchRecord {
    fn record_id(&self) -> RecordId;
    fn match_name(&self) -> &str;
}

impl MatchRecord for Contact {
    fn record_id(&self) -> RecordId {
        self.id
    }

    fn match_name(&self) -> &str {
        &self.name
    }
}

impl MatchRecord for Company {
    fn record_id(&self) -> RecordId {
        self.id
    }

    fn match_name(&self) -> &str {
        &self.name
    }
}

impl MatchRecord for Record {
    fn record_id(&self) -> RecordId {
        self.id()
    }

    fn match_name(&self) -> &str {
        self.name()
    }
}

/// A group of >= 2 records considered duplicates.
///
/// Members keep the collection's order; callers pass collections sorted
/// most-complete-first, so the first member is the conventional primary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCluster {
    /// Normalized match key (exact clusters) or normalized seed name
    /// (fuzzy clusters).
    pub key: String,
    pub member_ids: Vec<RecordId>,
    /// 1.0 for exact clusters; max pair score for fuzzy clusters.
    pub confidence: f64,
}

/// A single fuzzy match with its score.
#[derive(Clone, Debug)]
pub struct ScoredMatch<'a, R> {
    pub record: &'a R,
    pub score: f64,
}

/// Members of `records` whose normalized key equals the candidate's.
///
/// Case and whitespace insensitive by construction: both sides pass
/// through `normalize`. An empty normalized candidate matches nothing.
pub fn find_exact_duplicates<'a, R, K, N>(
    records: &'a [R],
    candidate_key: &str,
    key_fn: K,
    normalize: N,
    exclude: Option<RecordId>,
) -> Vec<&'a R>
where
    R: MatchRecord,
    K: Fn(&R) -> &str,
    N: Fn(&str) -> String,
{
    let target = normalize(candidate_key);
    if target.is_empty() {
        return Vec::new();
    }
    records
        .iter()
        .filter(|r| exclude != Some(r.record_id()))
        .filter(|r| normalize(key_fn(r)) == target)
        .collect()
}

/// Members scoring at or above `threshold` against the candidate name,
/// sorted descending by score (ties keep collection order).
pub fn find_fuzzy_matches<'a, R: MatchRecord>(
    records: &'a [R],
    candidate_name: &str,
    threshold: f64,
    exclude: Option<RecordId>,
) -> Vec<ScoredMatch<'a, R>> {
    if normalize_company_name(candidate_name).is_empty() {
        return Vec::new();
    }
    let mut matches: Vec<ScoredMatch<'a, R>> = records
        .iter()
        .filter(|r| exclude != Some(r.record_id()))
        .filter_map(|r| {
            let score = calculate_similarity(candidate_name, r.match_name());
            (score >= threshold).then_some(ScoredMatch { record: r, score })
        })
        .collect();
    matches.sort_by(|x, y| y.score.partial_cmp(&x.score).unwrap_or(Ordering::Equal));
    matches
}

/// Bucket every record by its normalized key in a single pass; buckets of
/// size >= 2 become clusters, in first-occurrence order. Records with an
/// empty normalized key never cluster.
pub fn group_exact_duplicates<R, K, N>(records: &[R], key_fn: K, normalize: N) -> Vec<DuplicateCluster>
where
    R: MatchRecord,
    K: Fn(&R) -> &str,
    N: Fn(&str) -> String,
{
    let mut buckets: HashMap<String, Vec<RecordId>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for record in records {
        let key = normalize(key_fn(record));
        if key.is_empty() {
            continue;
        }
        match buckets.entry(key.clone()) {
            Entry::Occupied(mut e) => e.get_mut().push(record.record_id()),
            Entry::Vacant(e) => {
                e.insert(vec![record.record_id()]);
                order.push(key);
            }
        }
    }

    let mut clusters = Vec::new();
    for key in order {
        if let Some(member_ids) = buckets.remove(&key) {
            if member_ids.len() >= 2 {
                clusters.push(DuplicateCluster {
                    key,
                    member_ids,
                    confidence: 1.0,
                });
            }
        }
    }
    clusters
}

/// Greedy first-match fuzzy clustering.
///
/// Iterates records in collection order; each unprocessed record seeds a
/// cluster and absorbs every later unprocessed record scoring at or above
/// the threshold against the *seed*. This is deliberately not
/// transitive-closure clustering: membership depends on scan order, and a
/// member joins via its similarity to the seed alone. Review tooling is
/// calibrated against these semantics, so keep them.
pub fn group_fuzzy_matches<R: MatchRecord>(records: &[R], threshold: f64) -> Vec<DuplicateCluster> {
    let mut clusters: Vec<DuplicateCluster> = Vec::new();
    let mut processed: HashSet<usize> = HashSet::new();

    for i in 0..records.len() {
        if processed.contains(&i) {
            continue;
        }

        let seed_key = normalize_company_name(records[i].match_name());
        if seed_key.is_empty() {
            processed.insert(i);
            continue;
        }

        let mut member_ids = vec![records[i].record_id()];
        let mut max_score: f64 = 0.0;

        for j in (i + 1)..records.len() {
            if processed.contains(&j) {
                continue;
            }

            let score = calculate_similarity(records[i].match_name(), records[j].match_name());
            if score >= threshold {
                member_ids.push(records[j].record_id());
                processed.insert(j);
                if score > max_score {
                    max_score = score;
                }
            }
        }

        if member_ids.len() > 1 {
            clusters.push(DuplicateCluster {
                key: seed_key,
                member_ids,
                confidence: max_score,
            });
        }

        processed.insert(i);
    }

    clusters
}
