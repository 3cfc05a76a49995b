use std::path::Path;
use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use tally_domain::{
    Activity, Company, Contact, Deal, EntityKind, FieldValues, MergeAudit, RecordId, Tag, Task,
};

use crate::store::{MergeTx, RecordStore, StoreError, TxError};

/// SQLite-backed implementation of the RecordStore trait.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn =
            Connection::open(path).map_err(|e| StoreError::Storage(format!("open: {}", e)))?;
        Self::init_with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Storage(format!("open_in_memory: {}", e)))?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS companies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                website TEXT NOT NULL DEFAULT '',
                phone TEXT NOT NULL DEFAULT '',
                industry TEXT NOT NULL DEFAULT '',
                address TEXT NOT NULL DEFAULT '',
                owner TEXT NOT NULL,
                created INTEGER NOT NULL,
                is_merged INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL DEFAULT '',
                phone TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL DEFAULT '',
                company_id TEXT REFERENCES companies(id),
                owner TEXT NOT NULL,
                created INTEGER NOT NULL,
                is_merged INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS deals (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                amount_cents INTEGER NOT NULL DEFAULT 0,
                contact_id TEXT REFERENCES contacts(id),
                company_id TEXT REFERENCES companies(id)
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                contact_id TEXT REFERENCES contacts(id)
            );

            CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                activity_type TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                contact_id TEXT REFERENCES contacts(id)
            );

            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS contact_tags (
                contact_id TEXT NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (contact_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS company_tags (
                company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (company_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS merge_audits (
                id TEXT PRIMARY KEY,
                entity_kind TEXT NOT NULL,
                primary_id TEXT NOT NULL,
                duplicate_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                merged_at INTEGER NOT NULL,
                field_snapshot TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email);
            CREATE INDEX IF NOT EXISTS idx_contacts_merged ON contacts(is_merged);
            CREATE INDEX IF NOT EXISTS idx_companies_name ON companies(name);
            CREATE INDEX IF NOT EXISTS idx_companies_merged ON companies(is_merged);
            CREATE INDEX IF NOT EXISTS idx_deals_contact ON deals(contact_id);
            CREATE INDEX IF NOT EXISTS idx_deals_company ON deals(company_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_contact ON tasks(contact_id);
            CREATE INDEX IF NOT EXISTS idx_activities_contact ON activities(contact_id);
            ",
        )
        .map_err(|e| StoreError::Storage(format!("init_schema: {}", e)))?;

        Ok(())
    }

    /// Soft-flag a record as merged outside a merge transaction.
    ///
    /// Administrative escape hatch; the engine only flips the flag inside
    /// a merge transaction.
    pub fn set_merged(&self, kind: EntityKind, id: RecordId) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        set_merged_flag(&conn, kind, id)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Storage(format!("lock: {}", e)))
    }
}

fn entity_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Contact => "contacts",
        EntityKind::Company => "companies",
    }
}

fn tag_table(kind: EntityKind) -> (&'static str, &'static str) {
    match kind {
        EntityKind::Contact => ("contact_tags", "contact_id"),
        EntityKind::Company => ("company_tags", "company_id"),
    }
}

/// Dependent tables holding a foreign key to the given entity kind.
fn dependent_refs(kind: EntityKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        EntityKind::Contact => &[
            ("deals", "contact_id"),
            ("tasks", "contact_id"),
            ("activities", "contact_id"),
        ],
        EntityKind::Company => &[("contacts", "company_id"), ("deals", "company_id")],
    }
}

fn parse_id(s: &str) -> Result<RecordId, StoreError> {
    uuid::Uuid::parse_str(s).map_err(|e| StoreError::Storage(format!("parse id: {}", e)))
}

fn parse_kind(s: &str) -> Result<EntityKind, StoreError> {
    match s {
        "contact" => Ok(EntityKind::Contact),
        "company" => Ok(EntityKind::Company),
        other => Err(StoreError::Storage(format!("unknown entity kind: {}", other))),
    }
}

fn millis_to_utc(ms: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> Result<Contact, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Storage(format!("row id: {}", e)))?;
    let name: String = row
        .get(1)
        .map_err(|e| StoreError::Storage(format!("row name: {}", e)))?;
    let email: String = row
        .get(2)
        .map_err(|e| StoreError::Storage(format!("row email: {}", e)))?;
    let phone: String = row
        .get(3)
        .map_err(|e| StoreError::Storage(format!("row phone: {}", e)))?;
    let title: String = row
        .get(4)
        .map_err(|e| StoreError::Storage(format!("row title: {}", e)))?;
    let company_id_str: Option<String> = row
        .get(5)
        .map_err(|e| StoreError::Storage(format!("row company_id: {}", e)))?;
    let owner: String = row
        .get(6)
        .map_err(|e| StoreError::Storage(format!("row owner: {}", e)))?;
    let created_ms: i64 = row
        .get(7)
        .map_err(|e| StoreError::Storage(format!("row created: {}", e)))?;
    let is_merged: bool = row
        .get(8)
        .map_err(|e| StoreError::Storage(format!("row is_merged: {}", e)))?;

    let company_id = match company_id_str {
        Some(s) => Some(parse_id(&s)?),
        None => None,
    };

    Ok(Contact {
        id: parse_id(&id_str)?,
        name,
        email,
        phone,
        title,
        company_id,
        owner,
        created_at: millis_to_utc(created_ms),
        is_merged,
    })
}

fn row_to_company(row: &rusqlite::Row<'_>) -> Result<Company, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Storage(format!("row id: {}", e)))?;
    let name: String = row
        .get(1)
        .map_err(|e| StoreError::Storage(format!("row name: {}", e)))?;
    let website: String = row
        .get(2)
        .map_err(|e| StoreError::Storage(format!("row website: {}", e)))?;
    let phone: String = row
        .get(3)
        .map_err(|e| StoreError::Storage(format!("row phone: {}", e)))?;
    let industry: String = row
        .get(4)
        .map_err(|e| StoreError::Storage(format!("row industry: {}", e)))?;
    let address: String = row
        .get(5)
        .map_err(|e| StoreError::Storage(format!("row address: {}", e)))?;
    let owner: String = row
        .get(6)
        .map_err(|e| StoreError::Storage(format!("row owner: {}", e)))?;
    let created_ms: i64 = row
        .get(7)
        .map_err(|e| StoreError::Storage(format!("row created: {}", e)))?;
    let is_merged: bool = row
        .get(8)
        .map_err(|e| StoreError::Storage(format!("row is_merged: {}", e)))?;

    Ok(Company {
        id: parse_id(&id_str)?,
        name,
        website,
        phone,
        industry,
        address,
        owner,
        created_at: millis_to_utc(created_ms),
        is_merged,
    })
}

fn row_to_deal(row: &rusqlite::Row<'_>) -> Result<Deal, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Storage(format!("row id: {}", e)))?;
    let name: String = row
        .get(1)
        .map_err(|e| StoreError::Storage(format!("row name: {}", e)))?;
    let amount_cents: i64 = row
        .get(2)
        .map_err(|e| StoreError::Storage(format!("row amount: {}", e)))?;
    let contact_id_str: Option<String> = row
        .get(3)
        .map_err(|e| StoreError::Storage(format!("row contact_id: {}", e)))?;
    let company_id_str: Option<String> = row
        .get(4)
        .map_err(|e| StoreError::Storage(format!("row company_id: {}", e)))?;

    Ok(Deal {
        id: parse_id(&id_str)?,
        name,
        amount_cents,
        contact_id: contact_id_str.as_deref().map(parse_id).transpose()?,
        company_id: company_id_str.as_deref().map(parse_id).transpose()?,
    })
}

const CONTACT_COLS: &str = "id, name, email, phone, title, company_id, owner, created, is_merged";
const COMPANY_COLS: &str = "id, name, website, phone, industry, address, owner, created, is_merged";
const DEAL_COLS: &str = "id, name, amount_cents, contact_id, company_id";

fn fetch_record_fields(
    conn: &Connection,
    kind: EntityKind,
    id: RecordId,
) -> Result<Option<(FieldValues, bool)>, StoreError> {
    let fields = kind.merge_fields();
    let sql = format!(
        "SELECT {}, is_merged FROM {} WHERE id = ?1",
        fields.join(", "),
        entity_table(kind)
    );
    conn.query_row(&sql, params![id.to_string()], |row| {
        let mut values = FieldValues::new();
        for (i, field) in fields.iter().enumerate() {
            let v: String = row.get(i)?;
            values.insert(field.to_string(), v);
        }
        let is_merged: bool = row.get(fields.len())?;
        Ok((values, is_merged))
    })
    .optional()
    .map_err(|e| StoreError::Storage(format!("record_fields: {}", e)))
}

fn update_record_fields(
    conn: &Connection,
    kind: EntityKind,
    id: RecordId,
    values: &FieldValues,
) -> Result<(), StoreError> {
    let mut sets = Vec::new();
    let mut args: Vec<String> = Vec::new();
    for field in kind.merge_fields() {
        if let Some(value) = values.get(*field) {
            sets.push(format!("{} = ?{}", field, sets.len() + 1));
            args.push(value.clone());
        }
    }
    if sets.is_empty() {
        return Ok(());
    }
    args.push(id.to_string());
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{}",
        entity_table(kind),
        sets.join(", "),
        args.len()
    );
    let changed = conn
        .execute(&sql, params_from_iter(args.iter()))
        .map_err(|e| StoreError::Storage(format!("update {}: {}", entity_table(kind), e)))?;
    if changed == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

fn set_merged_flag(conn: &Connection, kind: EntityKind, id: RecordId) -> Result<(), StoreError> {
    let sql = format!("UPDATE {} SET is_merged = 1 WHERE id = ?1", entity_table(kind));
    let changed = conn
        .execute(&sql, params![id.to_string()])
        .map_err(|e| StoreError::Storage(format!("mark_merged: {}", e)))?;
    if changed == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

fn load_tag_ids(
    conn: &Connection,
    kind: EntityKind,
    id: RecordId,
) -> Result<Vec<RecordId>, StoreError> {
    let (table, fk) = tag_table(kind);
    let sql = format!("SELECT tag_id FROM {} WHERE {} = ?1 ORDER BY tag_id", table, fk);
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::Storage(format!("prepare tag_ids: {}", e)))?;
    let ids = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
        .map_err(|e| StoreError::Storage(format!("query tag_ids: {}", e)))?
        .collect::<Result<Vec<String>, _>>()
        .map_err(|e| StoreError::Storage(format!("collect tag_ids: {}", e)))?;
    ids.iter().map(|s| parse_id(s)).collect()
}

fn insert_tag_association(
    conn: &Connection,
    kind: EntityKind,
    id: RecordId,
    tag_id: RecordId,
) -> Result<(), StoreError> {
    let (table, fk) = tag_table(kind);
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}, tag_id) VALUES (?1, ?2)",
        table, fk
    );
    conn.execute(&sql, params![id.to_string(), tag_id.to_string()])
        .map_err(|e| StoreError::Storage(format!("insert tag association: {}", e)))?;
    Ok(())
}

/// Transaction-scoped merge operations on a SQLite connection.
struct SqliteMergeTx<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl MergeTx for SqliteMergeTx<'_> {
    fn record_fields(
        &mut self,
        kind: EntityKind,
        id: RecordId,
    ) -> Result<Option<(FieldValues, bool)>, StoreError> {
        fetch_record_fields(self.tx, kind, id)
    }

    fn update_fields(
        &mut self,
        kind: EntityKind,
        id: RecordId,
        values: &FieldValues,
    ) -> Result<(), StoreError> {
        update_record_fields(self.tx, kind, id, values)
    }

    fn rewire_dependents(
        &mut self,
        kind: EntityKind,
        from: RecordId,
        to: RecordId,
    ) -> Result<usize, StoreError> {
        let mut rewired = 0;
        for (table, column) in dependent_refs(kind) {
            let sql = format!("UPDATE {} SET {} = ?1 WHERE {} = ?2", table, column, column);
            rewired += self
                .tx
                .execute(&sql, params![to.to_string(), from.to_string()])
                .map_err(|e| StoreError::Storage(format!("rewire {}: {}", table, e)))?;
        }
        Ok(rewired)
    }

    fn tag_ids(&mut self, kind: EntityKind, id: RecordId) -> Result<Vec<RecordId>, StoreError> {
        load_tag_ids(self.tx, kind, id)
    }

    fn add_tag_association(
        &mut self,
        kind: EntityKind,
        id: RecordId,
        tag_id: RecordId,
    ) -> Result<(), StoreError> {
        insert_tag_association(self.tx, kind, id, tag_id)
    }

    fn mark_merged(&mut self, kind: EntityKind, id: RecordId) -> Result<(), StoreError> {
        set_merged_flag(self.tx, kind, id)
    }

    fn insert_audit(&mut self, audit: &MergeAudit) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(&audit.field_snapshot)
            .map_err(|e| StoreError::Storage(format!("encode snapshot: {}", e)))?;
        self.tx
            .execute(
                "INSERT INTO merge_audits (id, entity_kind, primary_id, duplicate_id, actor, merged_at, field_snapshot)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    audit.id.to_string(),
                    audit.entity_kind.as_str(),
                    audit.primary_id.to_string(),
                    audit.duplicate_id.to_string(),
                    audit.actor,
                    audit.merged_at.timestamp_millis(),
                    snapshot,
                ],
            )
            .map_err(|e| StoreError::Storage(format!("insert audit: {}", e)))?;
        Ok(())
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO contacts (id, name, email, phone, title, company_id, owner, created, is_merged)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                contact.id.to_string(),
                contact.name,
                contact.email,
                contact.phone,
                contact.title,
                contact.company_id.map(|c| c.to_string()),
                contact.owner,
                contact.created_at.timestamp_millis(),
                contact.is_merged as i32,
            ],
        )
        .map_err(|e| StoreError::Storage(format!("insert contact: {}", e)))?;
        Ok(())
    }

    fn insert_company(&self, company: &Company) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO companies (id, name, website, phone, industry, address, owner, created, is_merged)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                company.id.to_string(),
                company.name,
                company.website,
                company.phone,
                company.industry,
                company.address,
                company.owner,
                company.created_at.timestamp_millis(),
                company.is_merged as i32,
            ],
        )
        .map_err(|e| StoreError::Storage(format!("insert company: {}", e)))?;
        Ok(())
    }

    fn insert_deal(&self, deal: &Deal) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO deals (id, name, amount_cents, contact_id, company_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                deal.id.to_string(),
                deal.name,
                deal.amount_cents,
                deal.contact_id.map(|c| c.to_string()),
                deal.company_id.map(|c| c.to_string()),
            ],
        )
        .map_err(|e| StoreError::Storage(format!("insert deal: {}", e)))?;
        Ok(())
    }

    fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO tasks (id, title, contact_id) VALUES (?1, ?2, ?3)",
            params![
                task.id.to_string(),
                task.title,
                task.contact_id.map(|c| c.to_string()),
            ],
        )
        .map_err(|e| StoreError::Storage(format!("insert task: {}", e)))?;
        Ok(())
    }

    fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO activities (id, activity_type, body, contact_id) VALUES (?1, ?2, ?3, ?4)",
            params![
                activity.id.to_string(),
                activity.activity_type,
                activity.body,
                activity.contact_id.map(|c| c.to_string()),
            ],
        )
        .map_err(|e| StoreError::Storage(format!("insert activity: {}", e)))?;
        Ok(())
    }

    fn insert_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO tags (id, name) VALUES (?1, ?2)",
            params![tag.id.to_string(), tag.name],
        )
        .map_err(|e| StoreError::Storage(format!("insert tag: {}", e)))?;
        Ok(())
    }

    fn tag_record(
        &self,
        kind: EntityKind,
        record_id: RecordId,
        tag_id: RecordId,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        insert_tag_association(&conn, kind, record_id, tag_id)
    }

    fn contact(&self, id: RecordId) -> Result<Option<Contact>, StoreError> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM contacts WHERE id = ?1", CONTACT_COLS);
        let row = conn
            .query_row(&sql, params![id.to_string()], |row| {
                Ok(row_to_contact(row))
            })
            .optional()
            .map_err(|e| StoreError::Storage(format!("get contact: {}", e)))?;
        row.transpose()
    }

    fn company(&self, id: RecordId) -> Result<Option<Company>, StoreError> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM companies WHERE id = ?1", COMPANY_COLS);
        let row = conn
            .query_row(&sql, params![id.to_string()], |row| {
                Ok(row_to_company(row))
            })
            .optional()
            .map_err(|e| StoreError::Storage(format!("get company: {}", e)))?;
        row.transpose()
    }

    fn contacts(&self, owner: Option<&str>) -> Result<Vec<Contact>, StoreError> {
        let conn = self.lock_conn()?;
        let (sql, args) = match owner {
            Some(o) => (
                format!(
                    "SELECT {} FROM contacts WHERE is_merged = 0 AND owner = ?1 ORDER BY created",
                    CONTACT_COLS
                ),
                vec![o.to_string()],
            ),
            None => (
                format!(
                    "SELECT {} FROM contacts WHERE is_merged = 0 ORDER BY created",
                    CONTACT_COLS
                ),
                vec![],
            ),
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Storage(format!("prepare contacts: {}", e)))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| Ok(row_to_contact(row)))
            .map_err(|e| StoreError::Storage(format!("query contacts: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect contacts: {}", e)))?;
        rows.into_iter().collect()
    }

    fn companies(&self, owner: Option<&str>) -> Result<Vec<Company>, StoreError> {
        let conn = self.lock_conn()?;
        let (sql, args) = match owner {
            Some(o) => (
                format!(
                    "SELECT {} FROM companies WHERE is_merged = 0 AND owner = ?1 ORDER BY created",
                    COMPANY_COLS
                ),
                vec![o.to_string()],
            ),
            None => (
                format!(
                    "SELECT {} FROM companies WHERE is_merged = 0 ORDER BY created",
                    COMPANY_COLS
                ),
                vec![],
            ),
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Storage(format!("prepare companies: {}", e)))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| Ok(row_to_company(row)))
            .map_err(|e| StoreError::Storage(format!("query companies: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect companies: {}", e)))?;
        rows.into_iter().collect()
    }

    fn tag_ids(&self, kind: EntityKind, record_id: RecordId) -> Result<Vec<RecordId>, StoreError> {
        let conn = self.lock_conn()?;
        load_tag_ids(&conn, kind, record_id)
    }

    fn deals_for_contact(&self, id: RecordId) -> Result<Vec<Deal>, StoreError> {
        let conn = self.lock_conn()?;
        query_deals(&conn, "contact_id", id)
    }

    fn tasks_for_contact(&self, id: RecordId) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT id, title, contact_id FROM tasks WHERE contact_id = ?1")
            .map_err(|e| StoreError::Storage(format!("prepare tasks: {}", e)))?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                let id_str: String = row.get(0)?;
                let title: String = row.get(1)?;
                let contact_id_str: Option<String> = row.get(2)?;
                Ok((id_str, title, contact_id_str))
            })
            .map_err(|e| StoreError::Storage(format!("query tasks: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect tasks: {}", e)))?;

        let mut tasks = Vec::with_capacity(rows.len());
        for (id_str, title, contact_id_str) in rows {
            tasks.push(Task {
                id: parse_id(&id_str)?,
                title,
                contact_id: contact_id_str.as_deref().map(parse_id).transpose()?,
            });
        }
        Ok(tasks)
    }

    fn activities_for_contact(&self, id: RecordId) -> Result<Vec<Activity>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, activity_type, body, contact_id FROM activities WHERE contact_id = ?1",
            )
            .map_err(|e| StoreError::Storage(format!("prepare activities: {}", e)))?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                let id_str: String = row.get(0)?;
                let activity_type: String = row.get(1)?;
                let body: String = row.get(2)?;
                let contact_id_str: Option<String> = row.get(3)?;
                Ok((id_str, activity_type, body, contact_id_str))
            })
            .map_err(|e| StoreError::Storage(format!("query activities: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect activities: {}", e)))?;

        let mut activities = Vec::with_capacity(rows.len());
        for (id_str, activity_type, body, contact_id_str) in rows {
            activities.push(Activity {
                id: parse_id(&id_str)?,
                activity_type,
                body,
                contact_id: contact_id_str.as_deref().map(parse_id).transpose()?,
            });
        }
        Ok(activities)
    }

    fn contacts_for_company(&self, id: RecordId) -> Result<Vec<Contact>, StoreError> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM contacts WHERE company_id = ?1 ORDER BY created",
            CONTACT_COLS
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Storage(format!("prepare company contacts: {}", e)))?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| Ok(row_to_contact(row)))
            .map_err(|e| StoreError::Storage(format!("query company contacts: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect company contacts: {}", e)))?;
        rows.into_iter().collect()
    }

    fn deals_for_company(&self, id: RecordId) -> Result<Vec<Deal>, StoreError> {
        let conn = self.lock_conn()?;
        query_deals(&conn, "company_id", id)
    }

    fn audits(&self, kind: EntityKind) -> Result<Vec<MergeAudit>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, entity_kind, primary_id, duplicate_id, actor, merged_at, field_snapshot
                 FROM merge_audits WHERE entity_kind = ?1 ORDER BY merged_at",
            )
            .map_err(|e| StoreError::Storage(format!("prepare audits: {}", e)))?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| {
                let id_str: String = row.get(0)?;
                let kind_str: String = row.get(1)?;
                let primary_str: String = row.get(2)?;
                let duplicate_str: String = row.get(3)?;
                let actor: String = row.get(4)?;
                let merged_ms: i64 = row.get(5)?;
                let snapshot_json: String = row.get(6)?;
                Ok((
                    id_str,
                    kind_str,
                    primary_str,
                    duplicate_str,
                    actor,
                    merged_ms,
                    snapshot_json,
                ))
            })
            .map_err(|e| StoreError::Storage(format!("query audits: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect audits: {}", e)))?;

        let mut audits = Vec::with_capacity(rows.len());
        for (id_str, kind_str, primary_str, duplicate_str, actor, merged_ms, snapshot_json) in rows
        {
            let field_snapshot: FieldValues = serde_json::from_str(&snapshot_json)
                .map_err(|e| StoreError::Storage(format!("parse snapshot: {}", e)))?;
            audits.push(MergeAudit {
                id: parse_id(&id_str)?,
                entity_kind: parse_kind(&kind_str)?,
                primary_id: parse_id(&primary_str)?,
                duplicate_id: parse_id(&duplicate_str)?,
                actor,
                merged_at: millis_to_utc(merged_ms),
                field_snapshot,
            });
        }
        Ok(audits)
    }

    fn with_merge_tx(
        &self,
        f: &mut dyn FnMut(&mut dyn MergeTx) -> Result<(), TxError>,
    ) -> Result<(), TxError> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::Storage(format!("begin tx: {}", e)))?;
        let mut mtx = SqliteMergeTx { tx: &tx };
        match f(&mut mtx) {
            Ok(()) => {
                tx.commit()
                    .map_err(|e| StoreError::Storage(format!("commit: {}", e)))?;
                Ok(())
            }
            // Dropping the transaction rolls it back
            Err(e) => Err(e),
        }
    }
}

fn query_deals(conn: &Connection, column: &str, id: RecordId) -> Result<Vec<Deal>, StoreError> {
    let sql = format!("SELECT {} FROM deals WHERE {} = ?1", DEAL_COLS, column);
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::Storage(format!("prepare deals: {}", e)))?;
    let rows = stmt
        .query_map(params![id.to_string()], |row| Ok(row_to_deal(row)))
        .map_err(|e| StoreError::Storage(format!("query deals: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::Storage(format!("collect deals: {}", e)))?;
    rows.into_iter().collect()
}
