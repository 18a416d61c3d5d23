//! Durable persistence of `FileMetadata` records.

use crate::{errors::UploadResult, models::file_metadata::FileMetadata};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Create/read/delete by id over the file-metadata record.
///
/// The storage engine is not prescribed; the service ships the SQLite
/// implementation below.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, record: &FileMetadata) -> UploadResult<FileMetadata>;

    async fn get(&self, id: i64) -> UploadResult<Option<FileMetadata>>;

    /// Remove the record; returns whether a row was deleted.
    async fn delete(&self, id: i64) -> UploadResult<bool>;

    async fn list_by_submission(&self, submission_id: i64) -> UploadResult<Vec<FileMetadata>>;
}

const SELECT_COLUMNS: &str = "SELECT id, file_name, file_size, file_type, storage_path, checksum,
            submission_id, student_id, created_at, last_update
     FROM file_metadata";

#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: &FileMetadata) -> UploadResult<FileMetadata> {
        let inserted = sqlx::query_as::<_, FileMetadata>(
            r#"
            INSERT INTO file_metadata (
                id, file_name, file_size, file_type, storage_path, checksum,
                submission_id, student_id, created_at, last_update
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, file_name, file_size, file_type, storage_path, checksum,
                      submission_id, student_id, created_at, last_update
            "#,
        )
        .bind(record.id)
        .bind(&record.file_name)
        .bind(record.file_size)
        .bind(&record.file_type)
        .bind(&record.storage_path)
        .bind(&record.checksum)
        .bind(record.submission_id)
        .bind(record.student_id)
        .bind(record.created_at)
        .bind(record.last_update)
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => {
                Err(crate::errors::UploadError::AlreadyExists(record.id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, id: i64) -> UploadResult<Option<FileMetadata>> {
        let row = sqlx::query_as::<_, FileMetadata>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row)
    }

    async fn delete(&self, id: i64) -> UploadResult<bool> {
        let result = sqlx::query("DELETE FROM file_metadata WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_submission(&self, submission_id: i64) -> UploadResult<Vec<FileMetadata>> {
        let rows = sqlx::query_as::<_, FileMetadata>(&format!(
            "{SELECT_COLUMNS} WHERE submission_id = ? ORDER BY id ASC"
        ))
        .bind(submission_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
