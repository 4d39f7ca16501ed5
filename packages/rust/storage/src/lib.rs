//! libSQL-backed blob store for task files.
//!
//! The [`Storage`] struct wraps a local libSQL database holding every file a
//! task touches: the uploaded source workbook, the normalized table, and the
//! merged output. Blobs are keyed by `(task_id, kind)`; re-storing a key
//! replaces the previous blob.
//!
//! **Access rules:**
//! - the pipeline and CLI: read-write via [`Storage::open`]
//! - inspection tooling: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use diplomagen_shared::{BlobKind, DiplomaGenError, Result, TaskId};
use libsql::{Connection, Database, params};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Metadata for one stored blob (without its bytes).
#[derive(Debug, Clone)]
pub struct BlobMeta {
    pub task_id: TaskId,
    pub kind: BlobKind,
    pub file_name: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DiplomaGenError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        DiplomaGenError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DiplomaGenError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Blob operations
    // -----------------------------------------------------------------------

    /// Store `data` under `(task_id, kind)`, replacing any previous blob.
    pub async fn put_blob(
        &self,
        task_id: &TaskId,
        kind: BlobKind,
        file_name: &str,
        data: &[u8],
    ) -> Result<()> {
        self.put_blob_at(task_id, kind, file_name, data, Utc::now())
            .await
    }

    /// Store a blob with an explicit creation time.
    pub async fn put_blob_at(
        &self,
        task_id: &TaskId,
        kind: BlobKind,
        file_name: &str,
        data: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO files (task_id, kind, file_name, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(task_id, kind) DO UPDATE SET
                   file_name = excluded.file_name,
                   data = excluded.data,
                   created_at = excluded.created_at",
                params![
                    task_id.as_str(),
                    kind.as_str(),
                    file_name,
                    data.to_vec(),
                    timestamp(created_at),
                ],
            )
            .await
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;

        tracing::debug!(%task_id, %kind, bytes = data.len(), "stored blob");
        Ok(())
    }

    /// Fetch the blob stored under `(task_id, kind)`, if any.
    pub async fn get_blob(&self, task_id: &TaskId, kind: BlobKind) -> Result<Option<Vec<u8>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM files WHERE task_id = ?1 AND kind = ?2",
                params![task_id.as_str(), kind.as_str()],
            )
            .await
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<Vec<u8>>(0)
                    .map_err(|e| DiplomaGenError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DiplomaGenError::Storage(e.to_string())),
        }
    }

    /// Like [`Storage::get_blob`], but a missing blob is an error.
    pub async fn require_blob(&self, task_id: &TaskId, kind: BlobKind) -> Result<Vec<u8>> {
        self.get_blob(task_id, kind)
            .await?
            .ok_or_else(|| DiplomaGenError::BlobNotFound {
                task_id: task_id.to_string(),
                kind,
            })
    }

    /// List blob metadata for one task, ordered by kind.
    pub async fn list_task_blobs(&self, task_id: &TaskId) -> Result<Vec<BlobMeta>> {
        let mut rows = self
            .conn
            .query(
                "SELECT task_id, kind, file_name, length(data), created_at
                 FROM files WHERE task_id = ?1 ORDER BY kind",
                params![task_id.as_str()],
            )
            .await
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_blob_meta(&row)?);
        }
        Ok(results)
    }

    /// Distinct task ids that still own at least one blob.
    pub async fn list_task_ids(&self) -> Result<Vec<TaskId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT task_id FROM files ORDER BY task_id",
                params![],
            )
            .await
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row
                .get(0)
                .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;
            results.push(TaskId::from(id));
        }
        Ok(results)
    }

    /// Delete every blob belonging to a task. Returns the number removed.
    pub async fn delete_task_blobs(&self, task_id: &TaskId) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM files WHERE task_id = ?1",
                params![task_id.as_str()],
            )
            .await
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))
    }

    /// Delete blobs created at or before `cutoff`. Returns the number removed.
    pub async fn delete_blobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM files WHERE created_at <= ?1",
                params![timestamp(cutoff)],
            )
            .await
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;

        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "deleted expired blobs");
        }
        Ok(removed)
    }
}

/// Fixed-width UTC timestamp so string comparison orders chronologically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert a database row to a [`BlobMeta`].
fn row_to_blob_meta(row: &libsql::Row) -> Result<BlobMeta> {
    let kind: String = row
        .get(1)
        .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;
    Ok(BlobMeta {
        task_id: TaskId::from(
            row.get::<String>(0)
                .map_err(|e| DiplomaGenError::Storage(e.to_string()))?,
        ),
        kind: BlobKind::parse(&kind)
            .ok_or_else(|| DiplomaGenError::Storage(format!("unknown blob kind '{kind}'")))?,
        file_name: row
            .get::<String>(2)
            .map_err(|e| DiplomaGenError::Storage(e.to_string()))?,
        size: row.get::<i64>(3).map(|v| v as usize).unwrap_or(0),
        created_at: {
            let s: String = row
                .get(4)
                .map_err(|e| DiplomaGenError::Storage(e.to_string()))?;
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DiplomaGenError::Storage(format!("invalid date: {e}")))?
        },
    })
}
