//! Accepts fragments one at a time, enforces strict in-order delivery per
//! upload, and finalizes the upload when the last fragment arrives.

use crate::{
    errors::{UploadError, UploadResult},
    models::{file_metadata::FileMetadata, fragment::FragmentEnvelope},
    services::{
        chunk_buffer::ChunkBuffer,
        metadata_recorder::{CompletedUpload, MetadataRecorder},
        reassembler::Reassembler,
    },
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of submitting a single fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "metadata", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadOutcome {
    Accepted,
    RejectedBadIndex,
    OutOfOrderDropped,
    Completed(FileMetadata),
}

type BufferSlot = Arc<Mutex<ChunkBuffer>>;

/// Owns every upload in flight.
///
/// The outer map lock is only held to find or insert a slot; each slot has its
/// own lock which serializes the compare-append-finalize sequence for one
/// `file_id`. Slots are never awaited while the outer lock is held.
pub struct UploadCoordinator {
    buffers: Mutex<HashMap<i64, BufferSlot>>,
    /// Ids evicted by the sweep, with the eviction time.
    abandoned: Mutex<HashMap<i64, DateTime<Utc>>>,
    reassembler: Reassembler,
    recorder: MetadataRecorder,
    ttl: Duration,
}

impl UploadCoordinator {
    pub fn new(reassembler: Reassembler, recorder: MetadataRecorder, ttl: Duration) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            abandoned: Mutex::new(HashMap::new()),
            reassembler,
            recorder,
            ttl,
        }
    }

    pub fn recorder(&self) -> &MetadataRecorder {
        &self.recorder
    }

    /// Submit one fragment.
    ///
    /// Only the next expected index is buffered; anything else is dropped and
    /// reported, leaving retransmission to the caller. The call that buffers
    /// the last fragment writes the artifact and records its metadata before
    /// returning `Completed`. If that fails, the last fragment is taken back
    /// out of the buffer so it can be resent.
    pub async fn accept_fragment(&self, envelope: FragmentEnvelope) -> UploadResult<UploadOutcome> {
        let file_id = envelope.file_id;
        if !envelope.index_in_range() {
            warn!(
                file_id,
                chunk_index = envelope.chunk_index,
                total_chunks = envelope.total_chunks,
                "rejected fragment with out-of-range index"
            );
            return Ok(UploadOutcome::RejectedBadIndex);
        }

        loop {
            let Some(slot) = self.slot_for(&envelope).await? else {
                warn!(
                    file_id,
                    chunk_index = envelope.chunk_index,
                    expected = 0,
                    "dropped out-of-order fragment"
                );
                return Ok(UploadOutcome::OutOfOrderDropped);
            };

            let mut buffer = slot.lock().await;
            if buffer.is_closed() {
                // finalized or evicted while we waited; look again
                continue;
            }

            if buffer.total_chunks() != envelope.total_chunks {
                warn!(
                    file_id,
                    declared = envelope.total_chunks,
                    recorded = buffer.total_chunks(),
                    "rejected fragment with mismatched chunk count"
                );
                return Ok(UploadOutcome::RejectedBadIndex);
            }
            if envelope.chunk_index != buffer.len() {
                warn!(
                    file_id,
                    chunk_index = envelope.chunk_index,
                    expected = buffer.len(),
                    "dropped out-of-order fragment"
                );
                return Ok(UploadOutcome::OutOfOrderDropped);
            }

            buffer.push(envelope.payload.clone());
            if !buffer.is_complete() {
                debug!(
                    file_id,
                    chunk_index = envelope.chunk_index,
                    buffered = buffer.len(),
                    "accepted fragment"
                );
                return Ok(UploadOutcome::Accepted);
            }

            let finalized = self.finalize(&buffer, &envelope).await;
            return match finalized {
                Ok(metadata) => {
                    buffer.close();
                    self.release(file_id, &slot).await;
                    info!(file_id, size = metadata.file_size, "upload completed");
                    Ok(UploadOutcome::Completed(metadata))
                }
                Err(err) => {
                    buffer.pop();
                    if buffer.is_empty() {
                        // nothing left to resume; the retry starts a fresh upload
                        buffer.close();
                        self.release(file_id, &slot).await;
                    }
                    warn!(file_id, error = %err, "finalization failed");
                    Err(err)
                }
            };
        }
    }

    /// Drop `slot` from the map unless another upload already took its place.
    async fn release(&self, file_id: i64, slot: &BufferSlot) {
        let mut buffers = self.buffers.lock().await;
        if buffers
            .get(&file_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            buffers.remove(&file_id);
        }
    }

    /// Find the slot for this fragment's upload, creating it for chunk 0.
    ///
    /// `None` means there is no upload to append to and the fragment is not a
    /// first fragment.
    async fn slot_for(&self, envelope: &FragmentEnvelope) -> UploadResult<Option<BufferSlot>> {
        let file_id = envelope.file_id;
        let mut buffers = self.buffers.lock().await;
        if let Some(slot) = buffers.get(&file_id) {
            return Ok(Some(slot.clone()));
        }

        {
            let mut abandoned = self.abandoned.lock().await;
            if abandoned.contains_key(&file_id) {
                if envelope.chunk_index > 0 {
                    return Err(UploadError::UploadAbandoned(file_id));
                }
                abandoned.remove(&file_id);
            }
        }

        if envelope.chunk_index != 0 {
            return Ok(None);
        }
        let slot = Arc::new(Mutex::new(ChunkBuffer::new(file_id, envelope.total_chunks)));
        buffers.insert(file_id, slot.clone());
        Ok(Some(slot))
    }

    async fn finalize(
        &self,
        buffer: &ChunkBuffer,
        last: &FragmentEnvelope,
    ) -> UploadResult<FileMetadata> {
        let file_id = buffer.file_id();
        if self.recorder.get(file_id).await?.is_some() {
            return Err(UploadError::AlreadyExists(file_id));
        }

        let artifact = self
            .reassembler
            .finalize(buffer, &last.file_name, &last.file_type)
            .await?;

        self.recorder
            .record_completed_upload(CompletedUpload {
                file_id,
                artifact,
                file_name: last.file_name.clone(),
                file_type: last.file_type.clone(),
                submission_id: last.submission_id,
                student_id: last.student_id,
            })
            .await
    }

    /// Evict buffers idle for longer than the TTL.
    ///
    /// Buffers whose lock is held are in use and skipped. Evicted ids are
    /// remembered for one more TTL so that a late fragment gets
    /// `UploadAbandoned` rather than a silent drop.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut buffers = self.buffers.lock().await;
        let mut abandoned = self.abandoned.lock().await;
        abandoned.retain(|_, evicted_at| *evicted_at >= cutoff);

        let mut evicted = Vec::new();
        buffers.retain(|file_id, slot| match slot.try_lock() {
            Ok(mut buffer) if buffer.is_idle_since(cutoff) => {
                warn!(
                    file_id = *file_id,
                    buffered = buffer.len(),
                    total_chunks = buffer.total_chunks(),
                    started = %buffer.created_at,
                    "evicting abandoned upload"
                );
                buffer.close();
                evicted.push(*file_id);
                false
            }
            _ => true,
        });

        for file_id in &evicted {
            abandoned.insert(*file_id, now);
        }
        evicted.len()
    }

    /// Number of uploads currently buffered.
    pub async fn in_flight(&self) -> usize {
        self.buffers.lock().await.len()
    }

    /// Number of evicted ids still answering `UploadAbandoned`.
    pub async fn abandoned_count(&self) -> usize {
        self.abandoned.lock().await.len()
    }

    /// Fragments buffered so far for `file_id`, if an upload is in flight.
    pub async fn buffered_count(&self, file_id: i64) -> Option<i64> {
        let slot = self.buffers.lock().await.get(&file_id).cloned()?;
        let buffer = slot.lock().await;
        (!buffer.is_closed()).then(|| buffer.len())
    }

    /// First half of replacing a file: delete the current record and artifact
    /// and discard any upload in flight under the same id.
    ///
    /// Until the returned handle completes a new upload, `id` has no record.
    /// If the new upload never completes the id stays empty.
    pub async fn begin_replace(&self, id: i64) -> UploadResult<ReplaceHandle> {
        let previous = self.recorder.delete(id).await?;

        let stale = self.buffers.lock().await.remove(&id);
        if let Some(slot) = stale {
            slot.lock().await.close();
        }

        info!(file_id = id, "replace started; awaiting new upload");
        Ok(ReplaceHandle { file_id: id, previous })
    }
}

/// An id whose record was deleted to make room for a new upload.
#[derive(Debug, Clone)]
pub struct ReplaceHandle {
    file_id: i64,
    previous: FileMetadata,
}

impl ReplaceHandle {
    pub fn file_id(&self) -> i64 {
        self.file_id
    }

    /// The record that was removed.
    pub fn previous(&self) -> &FileMetadata {
        &self.previous
    }

    /// Submit a fragment of the replacement, whatever id it carries.
    pub async fn accept(
        &self,
        coordinator: &UploadCoordinator,
        mut envelope: FragmentEnvelope,
    ) -> UploadResult<UploadOutcome> {
        envelope.file_id = self.file_id;
        coordinator.accept_fragment(envelope).await
    }
}
