//! Caller-facing engine facade
//!
//! Bundles the finder, planner, and executor behind the four operations
//! callers use: pre-submission candidate checks, full-collection scans,
//! merge planning, and merge execution. Collaborators are injected; the
//! engine holds no connection state of its own.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tally_domain::{
    EntityKind, FieldValues, MergeAudit, MergeDecision, Record, RecordId, RecordState,
};
use tally_store::RecordStore;

use crate::deduplication::{
    find_exact_duplicates, find_fuzzy_matches, group_exact_duplicates, group_fuzzy_matches,
    normalize_email, normalize_name, normalize_website, DedupConfig, DuplicateCluster,
};
use crate::error::MergeError;
use crate::merge::{plan_merge, MergeExecutor, TimelineSink};

type NormalizeFn = fn(&str) -> String;

/// Key fields used for exact duplicate matching, in priority order.
const CONTACT_EXACT_KEYS: &[(&str, NormalizeFn)] =
    &[("email", normalize_email), ("name", normalize_name)];
const COMPANY_EXACT_KEYS: &[(&str, NormalizeFn)] =
    &[("website", normalize_website), ("name", normalize_name)];

fn exact_keys(kind: EntityKind) -> &'static [(&'static str, NormalizeFn)] {
    match kind {
        EntityKind::Contact => CONTACT_EXACT_KEYS,
        EntityKind::Company => COMPANY_EXACT_KEYS,
    }
}

/// A fuzzy match surfaced to callers, with its similarity score.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub score: f64,
}

/// Result of a pre-submission duplicate check.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CandidateCheck {
    /// First record whose normalized key matches the candidate's, if any.
    pub exact_match: Option<Record>,
    /// Records whose name scores at or above the threshold, best first.
    pub similar: Vec<ScoredRecord>,
}

impl CandidateCheck {
    pub fn is_clean(&self) -> bool {
        self.exact_match.is_none() && self.similar.is_empty()
    }
}

/// Result of a full-collection duplicate scan.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub exact: Vec<DuplicateCluster>,
    pub fuzzy: Vec<DuplicateCluster>,
}

/// The duplicate detection and merge reconciliation engine.
pub struct DedupEngine {
    store: Arc<dyn RecordStore>,
    executor: MergeExecutor,
    config: DedupConfig,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn RecordStore>, timeline: Arc<dyn TimelineSink>) -> Self {
        Self::with_config(store, timeline, DedupConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn RecordStore>,
        timeline: Arc<dyn TimelineSink>,
        config: DedupConfig,
    ) -> Self {
        let executor = MergeExecutor::new(store.clone(), timeline);
        Self {
            store,
            executor,
            config,
        }
    }

    /// Pre-submission duplicate guard.
    ///
    /// Degrades gracefully: when the store is unavailable this returns an
    /// empty result with a warning rather than blocking record intake.
    pub fn check_candidate(
        &self,
        kind: EntityKind,
        candidate: &FieldValues,
        owner: Option<&str>,
        exclude: Option<RecordId>,
    ) -> CandidateCheck {
        let records = match self.store.records(kind, owner) {
            Ok(records) => records,
            Err(e) => {
                warn!(%kind, error = %e, "duplicate check degraded: store unavailable, allowing intake");
                return CandidateCheck::default();
            }
        };

        let mut exact_match = None;
        for (field, normalize) in exact_keys(kind) {
            let Some(value) = candidate.get(*field) else {
                continue;
            };
            let matches = find_exact_duplicates(
                &records,
                value,
                |r: &Record| r.field(field).unwrap_or(""),
                normalize,
                exclude,
            );
            if let Some(first) = matches.first() {
                exact_match = Some((*first).clone());
                break;
            }
        }

        let similar = match candidate.get("name") {
            Some(name) => {
                find_fuzzy_matches(&records, name, self.config.name_threshold, exclude)
                    .into_iter()
                    .map(|m| ScoredRecord {
                        record: m.record.clone(),
                        score: m.score,
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        CandidateCheck {
            exact_match,
            similar,
        }
    }

    /// Full-collection scan for bulk review tooling.
    ///
    /// Read-only; callers may abandon an in-flight scan with no side
    /// effects. Exact clusters are keyed `field:normalized-value`.
    pub fn scan(&self, kind: EntityKind, owner: Option<&str>) -> Result<ScanReport, MergeError> {
        let records = self.store.records(kind, owner)?;

        let mut exact = Vec::new();
        for (field, normalize) in exact_keys(kind) {
            for cluster in group_exact_duplicates(
                &records,
                |r: &Record| r.field(field).unwrap_or(""),
                normalize,
            ) {
                exact.push(DuplicateCluster {
                    key: format!("{}:{}", field, cluster.key),
                    ..cluster
                });
            }
        }

        let fuzzy = group_fuzzy_matches(&records, self.config.name_threshold);
        debug!(
            %kind,
            records = records.len(),
            exact_clusters = exact.len(),
            fuzzy_clusters = fuzzy.len(),
            "duplicate scan complete"
        );

        Ok(ScanReport { exact, fuzzy })
    }

    /// Propose a per-field resolution for merging `duplicate_id` into
    /// `primary_id`. The result is ready for direct execution or for
    /// interactive override.
    pub fn plan_merge(
        &self,
        kind: EntityKind,
        primary_id: RecordId,
        duplicate_id: RecordId,
    ) -> Result<MergeDecision, MergeError> {
        if primary_id == duplicate_id {
            return Err(MergeError::Validation(
                "a record cannot be merged with itself".into(),
            ));
        }
        let primary = self
            .store
            .record(kind, primary_id)?
            .ok_or(MergeError::NotFound(primary_id))?;
        let duplicate = self
            .store
            .record(kind, duplicate_id)?
            .ok_or(MergeError::NotFound(duplicate_id))?;
        if primary.is_merged() || duplicate.is_merged() {
            return Err(MergeError::Validation(
                "merged records cannot participate in a new merge".into(),
            ));
        }
        Ok(plan_merge(
            kind,
            &primary.field_values(),
            &duplicate.field_values(),
        ))
    }

    /// Execute a confirmed merge decision. See [`MergeExecutor::execute`].
    pub fn execute_merge(
        &self,
        kind: EntityKind,
        primary_id: RecordId,
        duplicate_id: RecordId,
        decision: &MergeDecision,
        actor: &str,
    ) -> Result<MergeAudit, MergeError> {
        self.executor
            .execute(kind, primary_id, duplicate_id, decision, actor)
    }

    /// Advisory lifecycle state for UI display. `flagged` is whatever a
    /// scan or candidate check surfaced; it is never persisted.
    pub fn record_state(&self, record: &Record, flagged: bool) -> RecordState {
        RecordState::of(record.is_merged(), flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_domain::{Company, Contact};
    use tally_store::{MergeTx, SqliteRecordStore, StoreError, TxError};

    use crate::merge::NullTimeline;

    fn engine_with_store() -> (Arc<SqliteRecordStore>, DedupEngine) {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let engine = DedupEngine::new(store.clone(), Arc::new(NullTimeline));
        (store, engine)
    }

    #[test]
    fn test_check_candidate_finds_exact_email_match() {
        let (store, engine) = engine_with_store();
        let existing = Contact::new("Ada Lovelace", "alice").with_email("ada@example.com");
        store.insert_contact(&existing).unwrap();

        let mut candidate = FieldValues::new();
        candidate.insert("email".into(), " ADA@example.com ".into());
        candidate.insert("name".into(), "A. Lovelace".into());

        let check = engine.check_candidate(EntityKind::Contact, &candidate, None, None);
        assert_eq!(check.exact_match.as_ref().map(|r| r.id()), Some(existing.id));
    }

    #[test]
    fn test_check_candidate_surfaces_similar_names() {
        let (store, engine) = engine_with_store();
        store
            .insert_company(&Company::new("Acme Corp", "alice"))
            .unwrap();
        store
            .insert_company(&Company::new("Acme Corporation", "alice"))
            .unwrap();
        store
            .insert_company(&Company::new("Zenith LLC", "alice"))
            .unwrap();

        let mut candidate = FieldValues::new();
        candidate.insert("name".into(), "Acme Co".into());

        let check = engine.check_candidate(EntityKind::Company, &candidate, None, None);
        assert_eq!(check.similar.len(), 2);
        assert!(check
            .similar
            .iter()
            .all(|s| s.record.name().starts_with("Acme")));
    }

    #[test]
    fn test_check_candidate_excludes_self() {
        let (store, engine) = engine_with_store();
        let existing = Contact::new("Ada", "alice").with_email("ada@example.com");
        store.insert_contact(&existing).unwrap();

        let check = engine.check_candidate(
            EntityKind::Contact,
            &existing.field_values(),
            None,
            Some(existing.id),
        );
        assert!(check.is_clean());
    }

    #[test]
    fn test_check_candidate_degrades_on_store_failure() {
        struct DownStore;
        impl RecordStore for DownStore {
            fn insert_contact(&self, _: &Contact) -> Result<(), StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn insert_company(&self, _: &Company) -> Result<(), StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn insert_deal(&self, _: &tally_domain::Deal) -> Result<(), StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn insert_task(&self, _: &tally_domain::Task) -> Result<(), StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn insert_activity(&self, _: &tally_domain::Activity) -> Result<(), StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn insert_tag(&self, _: &tally_domain::Tag) -> Result<(), StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn tag_record(
                &self,
                _: EntityKind,
                _: RecordId,
                _: RecordId,
            ) -> Result<(), StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn contact(&self, _: RecordId) -> Result<Option<Contact>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn company(&self, _: RecordId) -> Result<Option<Company>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn contacts(&self, _: Option<&str>) -> Result<Vec<Contact>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn companies(&self, _: Option<&str>) -> Result<Vec<Company>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn tag_ids(&self, _: EntityKind, _: RecordId) -> Result<Vec<RecordId>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn deals_for_contact(&self, _: RecordId) -> Result<Vec<tally_domain::Deal>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn tasks_for_contact(&self, _: RecordId) -> Result<Vec<tally_domain::Task>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn activities_for_contact(
                &self,
                _: RecordId,
            ) -> Result<Vec<tally_domain::Activity>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn contacts_for_company(&self, _: RecordId) -> Result<Vec<Contact>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn deals_for_company(&self, _: RecordId) -> Result<Vec<tally_domain::Deal>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn audits(&self, _: EntityKind) -> Result<Vec<MergeAudit>, StoreError> {
                Err(StoreError::Storage("down".into()))
            }
            fn with_merge_tx(
                &self,
                _: &mut dyn FnMut(&mut dyn MergeTx) -> Result<(), TxError>,
            ) -> Result<(), TxError> {
                Err(TxError::Store(StoreError::Storage("down".into())))
            }
        }

        let engine = DedupEngine::new(Arc::new(DownStore), Arc::new(NullTimeline));
        let mut candidate = FieldValues::new();
        candidate.insert("email".into(), "ada@example.com".into());

        // Availability of intake beats strict duplicate prevention here
        let check = engine.check_candidate(EntityKind::Contact, &candidate, None, None);
        assert!(check.is_clean());

        // Scans do not degrade; they propagate the failure
        assert!(engine.scan(EntityKind::Contact, None).is_err());
    }

    #[test]
    fn test_scan_reports_exact_and_fuzzy_clusters() {
        let (store, engine) = engine_with_store();
        for (name, email) in [
            ("Ada Lovelace", "shared@example.com"),
            ("A. Lovelace", "Shared@Example.com"),
            ("Grace Hopper", "grace@example.com"),
        ] {
            store
                .insert_contact(&Contact::new(name, "alice").with_email(email))
                .unwrap();
        }

        let report = engine.scan(EntityKind::Contact, None).unwrap();
        let email_cluster = report
            .exact
            .iter()
            .find(|c| c.key == "email:shared@example.com")
            .expect("email cluster");
        assert_eq!(email_cluster.member_ids.len(), 2);
        assert_eq!(email_cluster.confidence, 1.0);
    }

    #[test]
    fn test_scan_scopes_to_owner() {
        let (store, engine) = engine_with_store();
        store
            .insert_company(&Company::new("Acme", "alice").with_website("acme.example"))
            .unwrap();
        store
            .insert_company(&Company::new("Acme", "bob").with_website("acme.example"))
            .unwrap();

        let report = engine.scan(EntityKind::Company, Some("alice")).unwrap();
        assert!(report.exact.is_empty());
        assert!(report.fuzzy.is_empty());
    }

    #[test]
    fn test_record_state_is_advisory() {
        let (_, engine) = engine_with_store();
        let mut contact = Contact::new("Ada", "alice");
        let record = Record::Contact(contact.clone());
        assert_eq!(engine.record_state(&record, false), RecordState::Active);
        assert_eq!(engine.record_state(&record, true), RecordState::UnderReview);

        contact.is_merged = true;
        let record = Record::Contact(contact);
        assert_eq!(engine.record_state(&record, true), RecordState::Merged);
    }
}
