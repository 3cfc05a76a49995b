use tally_domain::{
    Activity, Company, Contact, Deal, EntityKind, FieldValues, MergeAudit, Record, RecordId, Tag,
    Task,
};

/// Errors from the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Error from a merge transaction body.
///
/// `Abort` is a domain-level rollback request (e.g. a concurrent merge was
/// detected inside the transaction); `Store` is a persistence failure.
/// Either way the transaction rolls back completely.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("merge aborted: {0}")]
    Abort(String),
}

/// Operations available inside a single merge transaction.
///
/// Every mutation performed through a `MergeTx` commits together or not at
/// all; there is no way to observe a half-applied merge.
pub trait MergeTx {
    /// Current mergeable field payload and `is_merged` flag for a record,
    /// read inside the transaction. `None` if the record does not exist.
    fn record_fields(
        &mut self,
        kind: EntityKind,
        id: RecordId,
    ) -> Result<Option<(FieldValues, bool)>, StoreError>;

    /// Write a resolved field payload to a record in one update.
    fn update_fields(
        &mut self,
        kind: EntityKind,
        id: RecordId,
        values: &FieldValues,
    ) -> Result<(), StoreError>;

    /// Rewrite every dependent-row foreign key from `from` to `to`.
    /// Returns the number of rows rewritten across all dependent tables.
    fn rewire_dependents(
        &mut self,
        kind: EntityKind,
        from: RecordId,
        to: RecordId,
    ) -> Result<usize, StoreError>;

    /// Tag ids currently associated with a record.
    fn tag_ids(&mut self, kind: EntityKind, id: RecordId) -> Result<Vec<RecordId>, StoreError>;

    /// Add a tag association. Adding an existing association is a no-op;
    /// associations are a set.
    fn add_tag_association(
        &mut self,
        kind: EntityKind,
        id: RecordId,
        tag_id: RecordId,
    ) -> Result<(), StoreError>;

    /// Soft-delete: set `is_merged = true`. The row is preserved for
    /// historical references but excluded from scans and listings.
    fn mark_merged(&mut self, kind: EntityKind, id: RecordId) -> Result<(), StoreError>;

    /// Persist an immutable merge audit row.
    fn insert_audit(&mut self, audit: &MergeAudit) -> Result<(), StoreError>;
}

/// The trait all storage backends implement.
pub trait RecordStore: Send + Sync {
    fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError>;
    fn insert_company(&self, company: &Company) -> Result<(), StoreError>;
    fn insert_deal(&self, deal: &Deal) -> Result<(), StoreError>;
    fn insert_task(&self, task: &Task) -> Result<(), StoreError>;
    fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError>;
    fn insert_tag(&self, tag: &Tag) -> Result<(), StoreError>;

    /// Associate a tag with a record (set semantics).
    fn tag_record(
        &self,
        kind: EntityKind,
        record_id: RecordId,
        tag_id: RecordId,
    ) -> Result<(), StoreError>;

    fn contact(&self, id: RecordId) -> Result<Option<Contact>, StoreError>;
    fn company(&self, id: RecordId) -> Result<Option<Company>, StoreError>;

    /// Non-merged contacts, optionally scoped to an owner.
    fn contacts(&self, owner: Option<&str>) -> Result<Vec<Contact>, StoreError>;

    /// Non-merged companies, optionally scoped to an owner.
    fn companies(&self, owner: Option<&str>) -> Result<Vec<Company>, StoreError>;

    fn tag_ids(&self, kind: EntityKind, record_id: RecordId) -> Result<Vec<RecordId>, StoreError>;

    fn deals_for_contact(&self, id: RecordId) -> Result<Vec<Deal>, StoreError>;
    fn tasks_for_contact(&self, id: RecordId) -> Result<Vec<Task>, StoreError>;
    fn activities_for_contact(&self, id: RecordId) -> Result<Vec<Activity>, StoreError>;
    fn contacts_for_company(&self, id: RecordId) -> Result<Vec<Contact>, StoreError>;
    fn deals_for_company(&self, id: RecordId) -> Result<Vec<Deal>, StoreError>;

    fn audits(&self, kind: EntityKind) -> Result<Vec<MergeAudit>, StoreError>;

    /// Run `f` inside one transaction: commit on `Ok`, full rollback on
    /// any `Err`. This is the only atomicity primitive the engine relies
    /// on; sequential independent calls are never an acceptable substitute.
    fn with_merge_tx(
        &self,
        f: &mut dyn FnMut(&mut dyn MergeTx) -> Result<(), TxError>,
    ) -> Result<(), TxError>;

    /// Fetch a record of either kind.
    fn record(&self, kind: EntityKind, id: RecordId) -> Result<Option<Record>, StoreError> {
        match kind {
            EntityKind::Contact => Ok(self.contact(id)?.map(Record::Contact)),
            EntityKind::Company => Ok(self.company(id)?.map(Record::Company)),
        }
    }

    /// Non-merged records of a kind, optionally owner-scoped.
    fn records(&self, kind: EntityKind, owner: Option<&str>) -> Result<Vec<Record>, StoreError> {
        match kind {
            EntityKind::Contact => {
                Ok(self.contacts(owner)?.into_iter().map(Record::Contact).collect())
            }
            EntityKind::Company => {
                Ok(self.companies(owner)?.into_iter().map(Record::Company).collect())
            }
        }
    }
}
