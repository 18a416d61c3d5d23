//! Shared fixtures for service tests.

use crate::{
    db,
    models::{file_metadata::FileMetadata, fragment::FragmentEnvelope},
    services::{
        lookup::SqliteLookup, metadata_recorder::MetadataRecorder,
        metadata_store::SqliteMetadataStore,
    },
};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;

/// Fresh in-memory database with the schema applied. One connection, so every
/// query sees the same memory database.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::run_migrations(&pool).await.expect("schema");
    Arc::new(pool)
}

pub async fn seed_owner(db: &SqlitePool, student_id: i64, submission_id: i64) {
    sqlx::query("INSERT OR IGNORE INTO students (id, name) VALUES (?, ?)")
        .bind(student_id)
        .bind(format!("student-{student_id}"))
        .execute(db)
        .await
        .expect("seed student");
    sqlx::query("INSERT INTO submissions (id, student_id, title) VALUES (?, ?, ?)")
        .bind(submission_id)
        .bind(student_id)
        .bind(format!("submission-{submission_id}"))
        .execute(db)
        .await
        .expect("seed submission");
}

pub fn metadata(id: i64, submission_id: i64) -> FileMetadata {
    let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    FileMetadata {
        id,
        file_name: format!("file-{id}"),
        file_size: 4,
        file_type: "txt".into(),
        storage_path: format!("/nonexistent/file-{id}<{id}>.txt"),
        checksum: "d41d8cd98f00b204e9800998ecf8427e".into(),
        submission_id,
        student_id: 1,
        created_at: at,
        last_update: at,
    }
}

pub const STUDENT: i64 = 1;
pub const SUBMISSION: i64 = 100;

/// Recorder over a fresh database with `STUDENT` and `SUBMISSION` seeded.
pub async fn seeded_recorder() -> (MetadataRecorder, Arc<SqlitePool>) {
    let db = memory_pool().await;
    seed_owner(&db, STUDENT, SUBMISSION).await;
    let recorder = MetadataRecorder::new(
        Arc::new(SqliteMetadataStore::new(db.clone())),
        Arc::new(SqliteLookup::new(db.clone())),
    );
    (recorder, db)
}

pub fn fragment(
    file_id: i64,
    chunk_index: i64,
    total_chunks: i64,
    payload: &[u8],
) -> FragmentEnvelope {
    FragmentEnvelope {
        file_id,
        chunk_index,
        total_chunks,
        payload: Bytes::copy_from_slice(payload),
        file_name: "upload".into(),
        file_type: "bin".into(),
        student_id: STUDENT,
        submission_id: SUBMISSION,
    }
}
