//! End-to-end merge flow tests against the SQLite store
//!
//! Covers the full happy path (field resolution, dependent rewiring, tag
//! union, soft delete, audit) plus atomicity under injected failures and
//! concurrent-merge conflicts.

use std::sync::{Arc, Mutex};

use tally_core::{
    DedupEngine, MergeError, MergeExecutor, NullTimeline, TimelineError, TimelineSink,
};
use tally_domain::{
    Activity, Company, Contact, Deal, EntityKind, MergeAudit, MergeSource, Record, RecordId, Tag,
    Task,
};
use tally_store::{MergeTx, RecordStore, SqliteRecordStore, StoreError, TxError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Failure mode injected by [`ChaosStore`].
enum Chaos {
    /// Fail `rewire_dependents` mid-transaction.
    FailRewire,
    /// Mark this record merged just before the transaction opens,
    /// simulating a concurrent merge that wins the race.
    MergeFirst(EntityKind, RecordId),
}

/// A store wrapper that injects failures at chosen points in the merge
/// transaction while delegating everything else to SQLite.
struct ChaosStore {
    inner: Arc<SqliteRecordStore>,
    chaos: Chaos,
}

struct FailRewireTx<'a> {
    inner: &'a mut dyn MergeTx,
}

impl MergeTx for FailRewireTx<'_> {
    fn record_fields(
        &mut self,
        kind: EntityKind,
        id: RecordId,
    ) -> Result<Option<(tally_domain::FieldValues, bool)>, StoreError> {
        self.inner.record_fields(kind, id)
    }

    fn update_fields(
        &mut self,
        kind: EntityKind,
        id: RecordId,
        values: &tally_domain::FieldValues,
    ) -> Result<(), StoreError> {
        self.inner.update_fields(kind, id, values)
    }

    fn rewire_dependents(
        &mut self,
        _kind: EntityKind,
        _from: RecordId,
        _to: RecordId,
    ) -> Result<usize, StoreError> {
        Err(StoreError::Storage("injected rewire failure".into()))
    }

    fn tag_ids(&mut self, kind: EntityKind, id: RecordId) -> Result<Vec<RecordId>, StoreError> {
        self.inner.tag_ids(kind, id)
    }

    fn add_tag_association(
        &mut self,
        kind: EntityKind,
        id: RecordId,
        tag_id: RecordId,
    ) -> Result<(), StoreError> {
        self.inner.add_tag_association(kind, id, tag_id)
    }

    fn mark_merged(&mut self, kind: EntityKind, id: RecordId) -> Result<(), StoreError> {
        self.inner.mark_merged(kind, id)
    }

    fn insert_audit(&mut self, audit: &MergeAudit) -> Result<(), StoreError> {
        self.inner.insert_audit(audit)
    }
}

impl RecordStore for ChaosStore {
    fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        self.inner.insert_contact(contact)
    }
    fn insert_company(&self, company: &Company) -> Result<(), StoreError> {
        self.inner.insert_company(company)
    }
    fn insert_deal(&self, deal: &Deal) -> Result<(), StoreError> {
        self.inner.insert_deal(deal)
    }
    fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.inner.insert_task(task)
    }
    fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        self.inner.insert_activity(activity)
    }
    fn insert_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        self.inner.insert_tag(tag)
    }
    fn tag_record(
        &self,
        kind: EntityKind,
        record_id: RecordId,
        tag_id: RecordId,
    ) -> Result<(), StoreError> {
        self.inner.tag_record(kind, record_id, tag_id)
    }
    fn contact(&self, id: RecordId) -> Result<Option<Contact>, StoreError> {
        self.inner.contact(id)
    }
    fn company(&self, id: RecordId) -> Result<Option<Company>, StoreError> {
        self.inner.company(id)
    }
    fn contacts(&self, owner: Option<&str>) -> Result<Vec<Contact>, StoreError> {
        self.inner.contacts(owner)
    }
    fn companies(&self, owner: Option<&str>) -> Result<Vec<Company>, StoreError> {
        self.inner.companies(owner)
    }
    fn tag_ids(&self, kind: EntityKind, record_id: RecordId) -> Result<Vec<RecordId>, StoreError> {
        self.inner.tag_ids(kind, record_id)
    }
    fn deals_for_contact(&self, id: RecordId) -> Result<Vec<Deal>, StoreError> {
        self.inner.deals_for_contact(id)
    }
    fn tasks_for_contact(&self, id: RecordId) -> Result<Vec<Task>, StoreError> {
        self.inner.tasks_for_contact(id)
    }
    fn activities_for_contact(&self, id: RecordId) -> Result<Vec<Activity>, StoreError> {
        self.inner.activities_for_contact(id)
    }
    fn contacts_for_company(&self, id: RecordId) -> Result<Vec<Contact>, StoreError> {
        self.inner.contacts_for_company(id)
    }
    fn deals_for_company(&self, id: RecordId) -> Result<Vec<Deal>, StoreError> {
        self.inner.deals_for_company(id)
    }
    fn audits(&self, kind: EntityKind) -> Result<Vec<MergeAudit>, StoreError> {
        self.inner.audits(kind)
    }
    fn with_merge_tx(
        &self,
        f: &mut dyn FnMut(&mut dyn MergeTx) -> Result<(), TxError>,
    ) -> Result<(), TxError> {
        match &self.chaos {
            Chaos::FailRewire => self.inner.with_merge_tx(&mut |tx| {
                let mut wrapped = FailRewireTx { inner: tx };
                f(&mut wrapped)
            }),
            Chaos::MergeFirst(kind, id) => {
                self.inner.set_merged(*kind, *id)?;
                self.inner.with_merge_tx(f)
            }
        }
    }
}

/// Records every timeline event for later assertions.
#[derive(Default)]
struct CaptureTimeline {
    events: Mutex<Vec<(EntityKind, RecordId, String)>>,
}

impl TimelineSink for CaptureTimeline {
    fn record_merge_event(
        &self,
        kind: EntityKind,
        primary_id: RecordId,
        summary: &str,
    ) -> Result<(), TimelineError> {
        self.events
            .lock()
            .unwrap()
            .push((kind, primary_id, summary.to_string()));
        Ok(())
    }
}

/// A sink that always fails; merges must still commit.
struct BrokenTimeline;

impl TimelineSink for BrokenTimeline {
    fn record_merge_event(
        &self,
        _kind: EntityKind,
        _primary_id: RecordId,
        _summary: &str,
    ) -> Result<(), TimelineError> {
        Err(TimelineError("sink offline".into()))
    }
}

fn store() -> Arc<SqliteRecordStore> {
    Arc::new(SqliteRecordStore::open_in_memory().unwrap())
}

#[test]
fn contact_merge_resolves_fields_rewires_dependents_and_unions_tags() {
    init_tracing();
    let store = store();
    let engine = DedupEngine::new(store.clone(), Arc::new(NullTimeline));

    let primary = Contact::new("Ada Lovelace", "alice").with_email("ada@example.com");
    let duplicate = Contact::new("A. Lovelace", "alice")
        .with_email("ada.lovelace@example.com")
        .with_phone("+1 555 0100")
        .with_title("Analyst");
    store.insert_contact(&primary).unwrap();
    store.insert_contact(&duplicate).unwrap();

    store
        .insert_deal(&Deal::new("Renewal", 125_000).for_contact(duplicate.id))
        .unwrap();
    store
        .insert_task(&Task::new("Follow up").for_contact(duplicate.id))
        .unwrap();
    store
        .insert_activity(&Activity::new("call", "Intro call").for_contact(duplicate.id))
        .unwrap();
    store
        .insert_deal(&Deal::new("Expansion", 50_000).for_contact(primary.id))
        .unwrap();

    let vip = Tag::new("vip");
    let lead = Tag::new("lead");
    let newsletter = Tag::new("newsletter");
    for tag in [&vip, &lead, &newsletter] {
        store.insert_tag(tag).unwrap();
    }
    // primary: {vip, lead}; duplicate: {lead, newsletter}
    store
        .tag_record(EntityKind::Contact, primary.id, vip.id)
        .unwrap();
    store
        .tag_record(EntityKind::Contact, primary.id, lead.id)
        .unwrap();
    store
        .tag_record(EntityKind::Contact, duplicate.id, lead.id)
        .unwrap();
    store
        .tag_record(EntityKind::Contact, duplicate.id, newsletter.id)
        .unwrap();

    let decision = engine
        .plan_merge(EntityKind::Contact, primary.id, duplicate.id)
        .unwrap();
    // Primary wins where populated, duplicate fills gaps
    assert_eq!(decision.source_for("email"), Some(MergeSource::Primary));
    assert_eq!(decision.source_for("phone"), Some(MergeSource::Duplicate));
    assert_eq!(decision.source_for("title"), Some(MergeSource::Duplicate));

    let audit = engine
        .execute_merge(EntityKind::Contact, primary.id, duplicate.id, &decision, "alice")
        .unwrap();

    let merged = store.contact(primary.id).unwrap().unwrap();
    assert_eq!(merged.email, "ada@example.com");
    assert_eq!(merged.phone, "+1 555 0100");
    assert_eq!(merged.title, "Analyst");
    assert!(!merged.is_merged);

    // All dependents now point at the primary
    assert_eq!(store.deals_for_contact(primary.id).unwrap().len(), 2);
    assert_eq!(store.tasks_for_contact(primary.id).unwrap().len(), 1);
    assert_eq!(store.activities_for_contact(primary.id).unwrap().len(), 1);
    assert!(store.deals_for_contact(duplicate.id).unwrap().is_empty());
    assert!(store.tasks_for_contact(duplicate.id).unwrap().is_empty());

    // Tag union: {vip, lead} + {lead, newsletter} = {vip, lead, newsletter}
    let mut tags = store.tag_ids(EntityKind::Contact, primary.id).unwrap();
    tags.sort();
    let mut expected = vec![vip.id, lead.id, newsletter.id];
    expected.sort();
    assert_eq!(tags, expected);

    // Duplicate is soft-deleted but still fetchable by id
    let losing = store.contact(duplicate.id).unwrap().unwrap();
    assert!(losing.is_merged);

    // Audit captures the resolved payload
    assert_eq!(audit.primary_id, primary.id);
    assert_eq!(audit.duplicate_id, duplicate.id);
    assert_eq!(audit.actor, "alice");
    assert_eq!(
        audit.field_snapshot.get("phone").map(String::as_str),
        Some("+1 555 0100")
    );
    let stored = store.audits(EntityKind::Contact).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, audit.id);

    // Merged records no longer appear in scans or candidate checks
    let report = engine.scan(EntityKind::Contact, None).unwrap();
    assert!(report.exact.is_empty());
    let check = engine.check_candidate(
        EntityKind::Contact,
        &duplicate.field_values(),
        None,
        Some(duplicate.id),
    );
    assert!(check.exact_match.is_none());
}

#[test]
fn company_merge_rewires_contacts_and_deals() {
    init_tracing();
    let store = store();
    let engine = DedupEngine::new(store.clone(), Arc::new(NullTimeline));

    let primary = Company::new("Acme Corp", "alice").with_website("https://acme.example");
    let duplicate = Company::new("Acme Corporation", "alice").with_industry("Manufacturing");
    store.insert_company(&primary).unwrap();
    store.insert_company(&duplicate).unwrap();

    let employed = Contact::new("Grace Hopper", "alice").with_company(duplicate.id);
    store.insert_contact(&employed).unwrap();
    store
        .insert_deal(&Deal::new("Pilot", 10_000).for_company(duplicate.id))
        .unwrap();

    let decision = engine
        .plan_merge(EntityKind::Company, primary.id, duplicate.id)
        .unwrap();
    engine
        .execute_merge(EntityKind::Company, primary.id, duplicate.id, &decision, "alice")
        .unwrap();

    let merged = store.company(primary.id).unwrap().unwrap();
    assert_eq!(merged.website, "https://acme.example");
    assert_eq!(merged.industry, "Manufacturing");

    let employees = store.contacts_for_company(primary.id).unwrap();
    assert_eq!(employees.len(), 1);
    assert_eq!(employees[0].id, employed.id);
    assert_eq!(store.deals_for_company(primary.id).unwrap().len(), 1);
    assert!(store.contacts_for_company(duplicate.id).unwrap().is_empty());
}

#[test]
fn failed_rewire_rolls_back_the_entire_merge() {
    init_tracing();
    let inner = store();

    let primary = Contact::new("Ada", "alice").with_email("ada@example.com");
    let duplicate = Contact::new("Ada L.", "alice").with_phone("+1 555 0100");
    inner.insert_contact(&primary).unwrap();
    inner.insert_contact(&duplicate).unwrap();
    inner
        .insert_deal(&Deal::new("Renewal", 125_000).for_contact(duplicate.id))
        .unwrap();

    let chaos = Arc::new(ChaosStore {
        inner: inner.clone(),
        chaos: Chaos::FailRewire,
    });
    let engine = DedupEngine::new(chaos, Arc::new(NullTimeline));
    let decision = engine
        .plan_merge(EntityKind::Contact, primary.id, duplicate.id)
        .unwrap();
    let err = engine
        .execute_merge(EntityKind::Contact, primary.id, duplicate.id, &decision, "alice")
        .unwrap_err();
    assert!(matches!(err, MergeError::Persistence(_)));

    // Nothing is observable from the failed merge
    let untouched = inner.contact(primary.id).unwrap().unwrap();
    assert_eq!(untouched.phone, "");
    let losing = inner.contact(duplicate.id).unwrap().unwrap();
    assert!(!losing.is_merged);
    assert_eq!(inner.deals_for_contact(duplicate.id).unwrap().len(), 1);
    assert!(inner.audits(EntityKind::Contact).unwrap().is_empty());
}

#[test]
fn concurrent_merge_of_duplicate_is_a_conflict() {
    init_tracing();
    let inner = store();

    let primary = Contact::new("Ada", "alice");
    let duplicate = Contact::new("Ada L.", "alice");
    inner.insert_contact(&primary).unwrap();
    inner.insert_contact(&duplicate).unwrap();

    // The duplicate gets merged by someone else between planning and
    // execution; the in-transaction re-check must catch it.
    let chaos = Arc::new(ChaosStore {
        inner: inner.clone(),
        chaos: Chaos::MergeFirst(EntityKind::Contact, duplicate.id),
    });
    let engine = DedupEngine::new(chaos, Arc::new(NullTimeline));
    let decision = engine
        .plan_merge(EntityKind::Contact, primary.id, duplicate.id)
        .unwrap();
    let err = engine
        .execute_merge(EntityKind::Contact, primary.id, duplicate.id, &decision, "alice")
        .unwrap_err();
    assert!(matches!(err, MergeError::Conflict(_)));
    assert!(inner.audits(EntityKind::Contact).unwrap().is_empty());
}

#[test]
fn merge_posts_one_timeline_event_naming_the_duplicate() {
    init_tracing();
    let store = store();
    let timeline = Arc::new(CaptureTimeline::default());
    let executor = MergeExecutor::new(store.clone(), timeline.clone());

    let primary = Contact::new("Ada Lovelace", "alice");
    let duplicate = Contact::new("A. Lovelace", "alice");
    store.insert_contact(&primary).unwrap();
    store.insert_contact(&duplicate).unwrap();

    let engine = DedupEngine::new(store.clone(), Arc::new(NullTimeline));
    let decision = engine
        .plan_merge(EntityKind::Contact, primary.id, duplicate.id)
        .unwrap();
    executor
        .execute(EntityKind::Contact, primary.id, duplicate.id, &decision, "alice")
        .unwrap();

    let events = timeline.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let (kind, target, summary) = &events[0];
    assert_eq!(*kind, EntityKind::Contact);
    assert_eq!(*target, primary.id);
    assert!(summary.contains("A. Lovelace"));
}

#[test]
fn timeline_failure_does_not_fail_a_committed_merge() {
    init_tracing();
    let store = store();
    let executor = MergeExecutor::new(store.clone(), Arc::new(BrokenTimeline));

    let primary = Contact::new("Ada", "alice");
    let duplicate = Contact::new("Ada L.", "alice").with_email("ada@example.com");
    store.insert_contact(&primary).unwrap();
    store.insert_contact(&duplicate).unwrap();

    let engine = DedupEngine::new(store.clone(), Arc::new(NullTimeline));
    let decision = engine
        .plan_merge(EntityKind::Contact, primary.id, duplicate.id)
        .unwrap();
    let audit = executor
        .execute(EntityKind::Contact, primary.id, duplicate.id, &decision, "alice")
        .unwrap();

    let merged = store.contact(primary.id).unwrap().unwrap();
    assert_eq!(merged.email, "ada@example.com");
    assert_eq!(store.audits(EntityKind::Contact).unwrap()[0].id, audit.id);
}

#[test]
fn overridden_decision_prefers_duplicate_values() {
    init_tracing();
    let store = store();
    let engine = DedupEngine::new(store.clone(), Arc::new(NullTimeline));

    let primary = Contact::new("Ada Lovelace", "alice").with_email("old@example.com");
    let duplicate = Contact::new("A. Lovelace", "alice").with_email("new@example.com");
    store.insert_contact(&primary).unwrap();
    store.insert_contact(&duplicate).unwrap();

    let mut decision = engine
        .plan_merge(EntityKind::Contact, primary.id, duplicate.id)
        .unwrap();
    decision.set("email", MergeSource::Duplicate);

    engine
        .execute_merge(EntityKind::Contact, primary.id, duplicate.id, &decision, "alice")
        .unwrap();

    let merged = store.contact(primary.id).unwrap().unwrap();
    assert_eq!(merged.email, "new@example.com");
}

#[test]
fn scan_surfaces_record_pair_that_plan_and_execute_can_consume() {
    init_tracing();
    let store = store();
    let engine = DedupEngine::new(store.clone(), Arc::new(NullTimeline));

    for (name, email) in [
        ("Ada Lovelace", "ada@example.com"),
        ("A. Lovelace", "ADA@example.com"),
    ] {
        store
            .insert_contact(&Contact::new(name, "alice").with_email(email))
            .unwrap();
    }

    let report = engine.scan(EntityKind::Contact, None).unwrap();
    let cluster = report
        .exact
        .iter()
        .find(|c| c.key == "email:ada@example.com")
        .expect("email cluster");
    assert_eq!(cluster.member_ids.len(), 2);

    let (primary_id, duplicate_id) = (cluster.member_ids[0], cluster.member_ids[1]);
    let decision = engine
        .plan_merge(EntityKind::Contact, primary_id, duplicate_id)
        .unwrap();
    engine
        .execute_merge(EntityKind::Contact, primary_id, duplicate_id, &decision, "alice")
        .unwrap();

    // The survivor still exists; records() excludes the merged loser
    let remaining = store
        .records(EntityKind::Contact, None)
        .unwrap()
        .iter()
        .map(Record::id)
        .collect::<Vec<_>>();
    assert_eq!(remaining, vec![primary_id]);
}
