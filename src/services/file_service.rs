//! Wiring of the upload pipeline into one cloneable handle shared by the
//! HTTP handlers and the background sweeper.

use crate::services::{
    chunk_splitter::ChunkSplitter,
    lookup::SqliteLookup,
    metadata_recorder::MetadataRecorder,
    metadata_store::SqliteMetadataStore,
    reassembler::Reassembler,
    upload_coordinator::UploadCoordinator,
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone)]
pub struct FileService {
    /// Shared SQLite connection pool, also used by the readiness check.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where artifacts are stored.
    pub base_path: PathBuf,

    pub coordinator: Arc<UploadCoordinator>,

    pub splitter: ChunkSplitter,
}

impl FileService {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        upload_ttl: Duration,
        download_chunk_size: usize,
    ) -> Self {
        let base_path = base_path.into();
        let recorder = MetadataRecorder::new(
            Arc::new(SqliteMetadataStore::new(db.clone())),
            Arc::new(SqliteLookup::new(db.clone())),
        );
        let coordinator = UploadCoordinator::new(
            Reassembler::new(base_path.clone()),
            recorder.clone(),
            upload_ttl,
        );

        Self {
            db,
            base_path,
            coordinator: Arc::new(coordinator),
            splitter: ChunkSplitter::new(recorder, download_chunk_size),
        }
    }

    pub fn recorder(&self) -> &MetadataRecorder {
        self.coordinator.recorder()
    }

    /// Periodically evict abandoned uploads until the runtime shuts down.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = coordinator.sweep_expired().await;
                if evicted > 0 {
                    info!(evicted, "swept abandoned uploads");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        test_support::{self, fragment},
        upload_coordinator::UploadOutcome,
    };
    use futures::TryStreamExt;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upload_then_download_through_shared_handle() {
        let dir = tempdir().unwrap();
        let db = test_support::memory_pool().await;
        test_support::seed_owner(&db, test_support::STUDENT, test_support::SUBMISSION).await;
        let service = FileService::new(db, dir.path(), Duration::from_secs(60), 3);

        service
            .coordinator
            .accept_fragment(fragment(1, 0, 2, b"hello "))
            .await
            .unwrap();
        let outcome = service
            .coordinator
            .accept_fragment(fragment(1, 1, 2, b"world"))
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::Completed(_)));

        let fragments: Vec<_> = service
            .splitter
            .split_for_download(1, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments.len(), 4);
        let listed = service
            .recorder()
            .list_by_submission(test_support::SUBMISSION)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn sweeper_evicts_idle_uploads() {
        let dir = tempdir().unwrap();
        let db = test_support::memory_pool().await;
        let service = FileService::new(db, dir.path(), Duration::ZERO, 3);
        service
            .coordinator
            .accept_fragment(fragment(2, 0, 2, b"x"))
            .await
            .unwrap();

        let sweeper = service.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;
        sweeper.abort();

        assert_eq!(service.coordinator.in_flight().await, 0);
    }
}
