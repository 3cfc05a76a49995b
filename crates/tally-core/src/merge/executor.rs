//! Atomic merge execution

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use tally_domain::{EntityKind, MergeAudit, MergeDecision, RecordId};
use tally_store::{RecordStore, StoreError, TxError};

use crate::error::MergeError;
use crate::merge::planner::{resolve_decision, validate_decision};

/// Destination for human-readable merge events on the surviving record's
/// timeline.
///
/// The sink is an external collaborator and cannot join the store
/// transaction; the [`MergeAudit`] row is the durable record of a merge.
pub trait TimelineSink: Send + Sync {
    fn record_merge_event(
        &self,
        kind: EntityKind,
        primary_id: RecordId,
        summary: &str,
    ) -> Result<(), TimelineError>;
}

#[derive(Debug, thiserror::Error)]
#[error("timeline sink: {0}")]
pub struct TimelineError(pub String);

/// A sink that drops events; useful for batch tooling and tests.
pub struct NullTimeline;

impl TimelineSink for NullTimeline {
    fn record_merge_event(
        &self,
        _kind: EntityKind,
        _primary_id: RecordId,
        _summary: &str,
    ) -> Result<(), TimelineError> {
        Ok(())
    }
}

/// Applies a confirmed merge decision: field update, dependent rewiring,
/// tag union, soft delete, audit. All writes happen inside one store
/// transaction; on any failure nothing is observable.
pub struct MergeExecutor {
    store: Arc<dyn RecordStore>,
    timeline: Arc<dyn TimelineSink>,
}

impl MergeExecutor {
    pub fn new(store: Arc<dyn RecordStore>, timeline: Arc<dyn TimelineSink>) -> Self {
        Self { store, timeline }
    }

    /// Merge `duplicate_id` into `primary_id` per the decision.
    ///
    /// Performs no retries: a merge is a deliberate, user-initiated action.
    pub fn execute(
        &self,
        kind: EntityKind,
        primary_id: RecordId,
        duplicate_id: RecordId,
        decision: &MergeDecision,
        actor: &str,
    ) -> Result<MergeAudit, MergeError> {
        if primary_id == duplicate_id {
            return Err(MergeError::Validation(
                "a record cannot be merged with itself".into(),
            ));
        }
        validate_decision(decision, kind)?;

        let primary = self
            .store
            .record(kind, primary_id)?
            .ok_or(MergeError::NotFound(primary_id))?;
        let duplicate = self
            .store
            .record(kind, duplicate_id)?
            .ok_or(MergeError::NotFound(duplicate_id))?;
        if primary.is_merged() {
            return Err(MergeError::Validation(format!(
                "primary {} {} is already merged",
                kind, primary_id
            )));
        }
        if duplicate.is_merged() {
            return Err(MergeError::Validation(format!(
                "duplicate {} {} is already merged",
                kind, duplicate_id
            )));
        }
        let duplicate_name = duplicate.name().to_string();

        let mut committed_audit: Option<MergeAudit> = None;
        let result = self.store.with_merge_tx(&mut |tx| {
            // Re-check both flags inside the transaction: a concurrent
            // merge may have won the race since validation.
            let (primary_fields, primary_merged) = tx
                .record_fields(kind, primary_id)?
                .ok_or_else(|| TxError::Abort(format!("primary {} no longer exists", primary_id)))?;
            let (duplicate_fields, duplicate_merged) =
                tx.record_fields(kind, duplicate_id)?.ok_or_else(|| {
                    TxError::Abort(format!("duplicate {} no longer exists", duplicate_id))
                })?;
            if primary_merged {
                return Err(TxError::Abort(format!(
                    "primary {} was merged concurrently",
                    primary_id
                )));
            }
            if duplicate_merged {
                return Err(TxError::Abort(format!(
                    "duplicate {} was merged concurrently",
                    duplicate_id
                )));
            }

            // Apply fields in one update
            let resolved = resolve_decision(decision, &primary_fields, &duplicate_fields);
            tx.update_fields(kind, primary_id, &resolved)?;

            // Rewire dependent foreign keys
            let rewired = tx.rewire_dependents(kind, duplicate_id, primary_id)?;

            // Union tag associations
            let existing: HashSet<RecordId> = tx.tag_ids(kind, primary_id)?.into_iter().collect();
            for tag_id in tx.tag_ids(kind, duplicate_id)? {
                if !existing.contains(&tag_id) {
                    tx.add_tag_association(kind, primary_id, tag_id)?;
                }
            }

            // Soft-delete the duplicate and persist the audit row
            tx.mark_merged(kind, duplicate_id)?;
            let audit = MergeAudit::new(kind, primary_id, duplicate_id, actor, resolved);
            tx.insert_audit(&audit)?;

            debug!(%kind, %primary_id, %duplicate_id, rewired, "merge transaction staged");
            committed_audit = Some(audit);
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(TxError::Abort(reason)) => return Err(MergeError::Conflict(reason)),
            Err(TxError::Store(e)) => return Err(MergeError::Persistence(e)),
        }
        let audit = committed_audit.ok_or_else(|| {
            MergeError::Persistence(StoreError::Storage(
                "merge transaction committed without an audit".into(),
            ))
        })?;

        // Best-effort: the merge already committed, so a sink failure is
        // logged rather than surfaced.
        let summary = format!(
            "Merged duplicate {} \"{}\" into this record",
            kind, duplicate_name
        );
        if let Err(e) = self
            .timeline
            .record_merge_event(kind, primary_id, &summary)
        {
            warn!(%kind, %primary_id, error = %e, "failed to post merge timeline event");
        }

        Ok(audit)
    }
}
