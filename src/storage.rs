use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OpenFlags, params};

use crate::{
    config::StorageConfig,
    error::{ProvisioningError, StorageError},
    namespace,
    record::{self, ApplicationRecord, DATE_FORMAT, NewApplication, TIMESTAMP_FORMAT},
    refid::{RandomRefIds, RefId, ReferenceIdGenerator},
};

/// Where the record table lives and how to connect to it. Passed explicitly to
/// every component that touches storage.
#[derive(Debug, Clone)]
pub struct StorageContext {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl StorageContext {
    pub fn new(db_path: PathBuf, busy_timeout: Duration) -> Self {
        Self {
            db_path,
            busy_timeout,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, ProvisioningError> {
        let db_path = namespace::database_path(&config.path, &config.namespace)?;
        Ok(Self::new(db_path, config.busy_timeout()))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn namespace_dir(&self) -> Option<&Path> {
        self.db_path.parent()
    }

    /// Opens a connection; only provisioning passes `create = true`.
    pub(crate) fn connect(&self, create: bool) -> rusqlite::Result<Connection> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(&self.db_path, flags)?;

        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(conn)
    }

    fn open(&self) -> Result<Connection, StorageError> {
        self.connect(false).map_err(|source| StorageError::Open {
            path: self.db_path.clone(),
            source,
        })
    }
}

/// Sole owner of persisted applications.
///
/// Every call opens its own connection on the blocking pool; concurrent
/// inserts, reads and clears are ordered only by SQLite's own locking.
#[derive(Debug, Clone)]
pub struct RecordStore {
    context: StorageContext,
    ref_ids: Arc<dyn ReferenceIdGenerator>,
}

impl RecordStore {
    pub fn new(context: StorageContext, ref_ids: Arc<dyn ReferenceIdGenerator>) -> Self {
        Self { context, ref_ids }
    }

    pub fn with_random_ref_ids(context: StorageContext) -> Self {
        Self::new(context, Arc::new(RandomRefIds::new()))
    }

    pub fn context(&self) -> &StorageContext {
        &self.context
    }

    pub async fn insert(&self, fields: NewApplication) -> Result<ApplicationRecord, StorageError> {
        let ref_id = self.ref_ids.generate();
        let submitted_at = record::now_timestamp();
        let context = self.context.clone();
        let record = tokio::task::spawn_blocking(move || {
            insert_blocking(&context, ref_id, submitted_at, fields)
        })
        .await??;

        tracing::info!(
            id = record.id,
            ref_id = %record.ref_id,
            "application stored"
        );
        Ok(record)
    }

    /// Newest first.
    pub async fn list_all(&self) -> Result<Vec<ApplicationRecord>, StorageError> {
        let context = self.context.clone();
        let records = tokio::task::spawn_blocking(move || list_all_blocking(&context)).await??;
        tracing::debug!(count = records.len(), "listed applications");
        Ok(records)
    }

    /// Deletes every application in one transaction and returns how many were
    /// removed. Irreversible.
    pub async fn clear_all(&self) -> Result<usize, StorageError> {
        let context = self.context.clone();
        let removed = tokio::task::spawn_blocking(move || clear_all_blocking(&context)).await??;
        tracing::warn!(removed, "cleared all applications");
        Ok(removed)
    }

    pub async fn count(&self) -> Result<u64, StorageError> {
        let context = self.context.clone();
        tokio::task::spawn_blocking(move || count_blocking(&context)).await?
    }
}

fn insert_blocking(
    context: &StorageContext,
    ref_id: RefId,
    submitted_at: NaiveDateTime,
    fields: NewApplication,
) -> Result<ApplicationRecord, StorageError> {
    let conn = context.open()?;
    conn.execute(
        r#"
        INSERT INTO applications (
          ref_id,
          fullname,
          email,
          phone,
          gender,
          dob,
          course,
          session_time,
          address,
          submission_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            ref_id.as_str(),
            fields.full_name,
            fields.email,
            fields.phone,
            fields.gender,
            fields.date_of_birth.format(DATE_FORMAT).to_string(),
            fields.course,
            fields.session_time,
            fields.address,
            submitted_at.format(TIMESTAMP_FORMAT).to_string(),
        ],
    )
    .map_err(StorageError::query("insert application"))?;

    let id = conn.last_insert_rowid();
    Ok(ApplicationRecord::from_new(id, ref_id, submitted_at, fields))
}

fn list_all_blocking(context: &StorageContext) -> Result<Vec<ApplicationRecord>, StorageError> {
    let conn = context.open()?;
    let mut stmt = conn
        .prepare(
            r#"
            SELECT
              id,
              ref_id,
              fullname,
              email,
              phone,
              gender,
              dob,
              course,
              session_time,
              address,
              submission_date
            FROM applications
            ORDER BY id DESC
            "#,
        )
        .map_err(StorageError::query("prepare list applications"))?;

    let mut rows = stmt
        .query([])
        .map_err(StorageError::query("query list applications"))?;

    let mut records = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(StorageError::query("iterate list applications"))?
    {
        records.push(deserialize_application(row)?);
    }
    Ok(records)
}

fn clear_all_blocking(context: &StorageContext) -> Result<usize, StorageError> {
    let mut conn = context.open()?;
    let tx = conn
        .transaction()
        .map_err(StorageError::query("begin clear applications"))?;
    let removed = tx
        .execute("DELETE FROM applications", [])
        .map_err(StorageError::query("clear applications"))?;
    tx.commit()
        .map_err(StorageError::query("commit clear applications"))?;
    Ok(removed)
}

fn count_blocking(context: &StorageContext) -> Result<u64, StorageError> {
    let conn = context.open()?;
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM applications", [], |row| row.get(0))
        .map_err(StorageError::query("count applications"))?;
    u64::try_from(count).map_err(|err| StorageError::decode("count", err))
}

fn text_column(row: &rusqlite::Row<'_>, idx: usize, column: &'static str) -> Result<String, StorageError> {
    row.get::<_, String>(idx)
        .map_err(|err| StorageError::decode(column, err))
}

fn deserialize_application(row: &rusqlite::Row<'_>) -> Result<ApplicationRecord, StorageError> {
    let id = row
        .get::<_, i64>(0)
        .map_err(|err| StorageError::decode("id", err))?;
    let ref_id = RefId::parse(&text_column(row, 1, "ref_id")?)
        .map_err(|err| StorageError::decode("ref_id", err))?;
    let dob = text_column(row, 6, "dob")?;
    let date_of_birth = NaiveDate::parse_from_str(&dob, DATE_FORMAT)
        .map_err(|err| StorageError::decode("dob", format!("`{dob}`: {err}")))?;
    let submission_date = text_column(row, 10, "submission_date")?;
    let submitted_at = NaiveDateTime::parse_from_str(&submission_date, TIMESTAMP_FORMAT)
        .map_err(|err| StorageError::decode("submission_date", format!("`{submission_date}`: {err}")))?;

    Ok(ApplicationRecord {
        id,
        ref_id,
        full_name: text_column(row, 2, "fullname")?,
        email: text_column(row, 3, "email")?,
        phone: text_column(row, 4, "phone")?,
        gender: text_column(row, 5, "gender")?,
        date_of_birth,
        course: text_column(row, 7, "course")?,
        session_time: text_column(row, 8, "session_time")?,
        address: text_column(row, 9, "address")?,
        submitted_at,
    })
}
