//! Resolution of the owner (student) and association (submission) a file
//! belongs to. Both entities are owned elsewhere in the platform.

use crate::{
    errors::UploadResult,
    models::owner::{Student, Submission},
};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

#[async_trait]
pub trait LookupService: Send + Sync {
    async fn resolve_student(&self, id: i64) -> UploadResult<Option<Student>>;

    async fn resolve_submission(&self, id: i64) -> UploadResult<Option<Submission>>;
}

/// Reads the platform's `students` and `submissions` tables.
#[derive(Clone)]
pub struct SqliteLookup {
    db: Arc<SqlitePool>,
}

impl SqliteLookup {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LookupService for SqliteLookup {
    async fn resolve_student(&self, id: i64) -> UploadResult<Option<Student>> {
        let row = sqlx::query_as::<_, Student>("SELECT id, name FROM students WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row)
    }

    async fn resolve_submission(&self, id: i64) -> UploadResult<Option<Submission>> {
        let row = sqlx::query_as::<_, Submission>(
            "SELECT id, student_id, title FROM submissions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }
}
