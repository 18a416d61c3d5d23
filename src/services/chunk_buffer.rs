//! In-memory holder of the fragments received for one upload.

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Fragments accepted so far for a single `file_id`, in index order.
///
/// The buffer only ever grows by appending the next expected index, so
/// `fragments[i]` is always chunk `i`.
#[derive(Debug)]
pub struct ChunkBuffer {
    file_id: i64,
    total_chunks: i64,
    fragments: Vec<Bytes>,
    /// Set once the buffer has been removed from the coordinator's map.
    closed: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ChunkBuffer {
    pub fn new(file_id: i64, total_chunks: i64) -> Self {
        let now = Utc::now();
        Self {
            file_id,
            total_chunks,
            fragments: Vec::new(),
            closed: false,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn file_id(&self) -> i64 {
        self.file_id
    }

    pub fn total_chunks(&self) -> i64 {
        self.total_chunks
    }

    /// Number of buffered fragments, which is also the next expected index.
    pub fn len(&self) -> i64 {
        self.fragments.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.len() == self.total_chunks
    }

    /// Append the next fragment. Returns false, leaving the buffer untouched,
    /// if the buffer is already full.
    pub fn push(&mut self, payload: Bytes) -> bool {
        if self.is_complete() {
            return false;
        }
        self.fragments.push(payload);
        self.last_activity = Utc::now();
        true
    }

    /// Drop the most recent fragment so its sender can resend it.
    pub fn pop(&mut self) -> Option<Bytes> {
        self.fragments.pop()
    }

    pub fn fragments(&self) -> &[Bytes] {
        &self.fragments
    }

    pub fn total_size(&self) -> u64 {
        self.fragments.iter().map(|f| f.len() as u64).sum()
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.fragments.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_activity < cutoff
    }
}
