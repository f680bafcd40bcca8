use std::fs;

use rusqlite::Connection;

use crate::{error::ProvisioningError, storage::StorageContext};

pub const SCHEMA_VERSION: i32 = 1;

const CREATE_APPLICATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS applications (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ref_id TEXT NOT NULL,
  fullname TEXT NOT NULL,
  email TEXT NOT NULL,
  phone TEXT NOT NULL,
  gender TEXT NOT NULL,
  dob TEXT NOT NULL,
  course TEXT NOT NULL,
  session_time TEXT NOT NULL,
  address TEXT NOT NULL,
  submission_date TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
);
"#;

/// Creates the namespace directory and the `applications` table when absent.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    context: StorageContext,
}

impl SchemaManager {
    pub fn new(context: StorageContext) -> Self {
        Self { context }
    }

    /// Safe to run on every start. Errors are fatal to the caller; nothing is
    /// retried.
    pub fn ensure_ready(&self) -> Result<(), ProvisioningError> {
        if let Some(namespace_dir) = self.context.namespace_dir() {
            fs::create_dir_all(namespace_dir).map_err(|source| {
                ProvisioningError::CreateNamespace {
                    path: namespace_dir.to_path_buf(),
                    source,
                }
            })?;
        }

        let mut conn = self
            .context
            .connect(true)
            .map_err(|source| ProvisioningError::Open {
                path: self.context.db_path().to_path_buf(),
                source,
            })?;
        migrate(&mut conn)?;

        tracing::info!(
            db_path = %self.context.db_path().display(),
            schema_version = SCHEMA_VERSION,
            "storage ready"
        );
        Ok(())
    }

    /// [`Self::ensure_ready`] on the blocking pool, for async callers.
    pub async fn provision(&self) -> Result<(), ProvisioningError> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.ensure_ready()).await?
    }
}

fn migrate(conn: &mut Connection) -> Result<(), ProvisioningError> {
    let user_version: i32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|source| ProvisioningError::Schema {
            operation: "read PRAGMA user_version",
            source,
        })?;

    match user_version {
        0 => {
            let tx = conn
                .transaction()
                .map_err(|source| ProvisioningError::Schema {
                    operation: "begin schema transaction",
                    source,
                })?;
            tx.execute_batch(CREATE_APPLICATIONS_TABLE)
                .map_err(|source| ProvisioningError::Schema {
                    operation: "create applications table",
                    source,
                })?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|source| ProvisioningError::Schema {
                    operation: "set PRAGMA user_version",
                    source,
                })?;
            tx.commit().map_err(|source| ProvisioningError::Schema {
                operation: "commit schema transaction",
                source,
            })
        }
        SCHEMA_VERSION => Ok(()),
        found => Err(ProvisioningError::UnsupportedVersion {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}
