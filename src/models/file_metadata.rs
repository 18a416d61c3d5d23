//! Represents the durable record of a reassembled file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for one completed upload.
///
/// The record id is the `file_id` the fragments were uploaded under, so a
/// replaced file keeps its public id. The artifact bytes live on disk at
/// `storage_path`; this struct never holds content.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Upload id, also the primary key.
    pub id: i64,

    /// Name declared by the uploader (without the id suffix).
    pub file_name: String,

    /// Exact byte count of the artifact.
    pub file_size: i64,

    /// Declared type, used as the artifact's extension.
    pub file_type: String,

    /// Location of the artifact on durable storage.
    pub storage_path: String,

    /// MD5 hex digest of the artifact bytes.
    pub checksum: String,

    /// Submission this file belongs to.
    pub submission_id: i64,

    /// Student who uploaded the file.
    pub student_id: i64,

    pub created_at: DateTime<Utc>,

    pub last_update: DateTime<Utc>,
}
