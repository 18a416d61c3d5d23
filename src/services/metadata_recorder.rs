//! Validates owner references and persists, reads and deletes file records.

use crate::{
    errors::{ReferenceKind, UploadError, UploadResult},
    models::file_metadata::FileMetadata,
    services::{lookup::LookupService, metadata_store::MetadataStore, reassembler::Artifact},
};
use chrono::Utc;
use std::{io::ErrorKind, sync::Arc};
use tokio::fs;
use tracing::{debug, info, warn};

/// Everything known about an upload once its artifact is on disk.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub file_id: i64,
    pub artifact: Artifact,
    pub file_name: String,
    pub file_type: String,
    pub submission_id: i64,
    pub student_id: i64,
}

#[derive(Clone)]
pub struct MetadataRecorder {
    store: Arc<dyn MetadataStore>,
    lookup: Arc<dyn LookupService>,
}

impl MetadataRecorder {
    pub fn new(store: Arc<dyn MetadataStore>, lookup: Arc<dyn LookupService>) -> Self {
        Self { store, lookup }
    }

    /// Resolve both references, then insert the record.
    ///
    /// When a reference is missing the artifact written for this upload stays
    /// on disk; the warning names its path so it can be cleaned up.
    pub async fn record_completed_upload(
        &self,
        upload: CompletedUpload,
    ) -> UploadResult<FileMetadata> {
        if let Err(err) = self
            .ensure_references(upload.student_id, upload.submission_id)
            .await
        {
            warn!(
                file_id = upload.file_id,
                path = %upload.artifact.storage_path.display(),
                error = %err,
                "artifact left without metadata"
            );
            return Err(err);
        }

        let now = Utc::now();
        let record = FileMetadata {
            id: upload.file_id,
            file_name: upload.file_name,
            file_size: upload.artifact.total_size as i64,
            file_type: upload.file_type,
            storage_path: upload.artifact.storage_path.to_string_lossy().into_owned(),
            checksum: upload.artifact.checksum,
            submission_id: upload.submission_id,
            student_id: upload.student_id,
            created_at: now,
            last_update: now,
        };

        let stored = self.store.insert(&record).await?;
        info!(
            file_id = stored.id,
            size = stored.file_size,
            path = %stored.storage_path,
            "recorded upload"
        );
        Ok(stored)
    }

    async fn ensure_references(&self, student_id: i64, submission_id: i64) -> UploadResult<()> {
        if self.lookup.resolve_student(student_id).await?.is_none() {
            return Err(UploadError::ReferenceNotFound {
                kind: ReferenceKind::Student,
                id: student_id,
            });
        }
        if self.lookup.resolve_submission(submission_id).await?.is_none() {
            return Err(UploadError::ReferenceNotFound {
                kind: ReferenceKind::Submission,
                id: submission_id,
            });
        }
        Ok(())
    }

    pub async fn get(&self, id: i64) -> UploadResult<Option<FileMetadata>> {
        self.store.get(id).await
    }

    /// Like `get`, but a missing record is an error.
    pub async fn require(&self, id: i64) -> UploadResult<FileMetadata> {
        self.store.get(id).await?.ok_or(UploadError::NotFound(id))
    }

    pub async fn list_by_submission(&self, submission_id: i64) -> UploadResult<Vec<FileMetadata>> {
        self.store.list_by_submission(submission_id).await
    }

    /// Remove the artifact (best effort), then the record.
    ///
    /// A failed artifact delete is logged at warn level and does not stop the
    /// record from being removed.
    pub async fn delete(&self, id: i64) -> UploadResult<FileMetadata> {
        let record = self.require(id).await?;

        match fs::remove_file(&record.storage_path).await {
            Ok(_) => debug!("removed artifact {}", record.storage_path),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("artifact {} already missing", record.storage_path);
            }
            Err(err) => warn!(
                file_id = id,
                path = %record.storage_path,
                error = %err,
                "failed to remove artifact; deleting metadata anyway"
            ),
        }

        if !self.store.delete(id).await? {
            return Err(UploadError::NotFound(id));
        }
        info!(file_id = id, "deleted file");
        Ok(record)
    }
}
