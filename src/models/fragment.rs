//! The unit of transfer for both uploads and downloads.

use bytes::Bytes;
use serde::Serialize;

/// One contiguous byte range of a file, tagged with its position.
///
/// Descriptive fields (`file_name`, `file_type`) and owner references travel
/// on every fragment; only the final fragment's values are used when the
/// upload completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentEnvelope {
    pub file_id: i64,
    /// Zero-based position of this fragment.
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub payload: Bytes,
    pub file_name: String,
    pub file_type: String,
    pub student_id: i64,
    pub submission_id: i64,
}

impl FragmentEnvelope {
    /// `0 <= chunk_index < total_chunks`
    pub fn index_in_range(&self) -> bool {
        self.total_chunks > 0 && self.chunk_index >= 0 && self.chunk_index < self.total_chunks
    }
}

/// JSON form of a download fragment; the payload is base64 encoded.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FragmentView {
    pub file_id: i64,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub file_name: String,
    pub file_type: String,
    pub student_id: i64,
    pub submission_id: i64,
    pub payload: String,
}

impl From<&FragmentEnvelope> for FragmentView {
    fn from(fragment: &FragmentEnvelope) -> Self {
        use base64::{Engine as _, engine::general_purpose};

        Self {
            file_id: fragment.file_id,
            chunk_index: fragment.chunk_index,
            total_chunks: fragment.total_chunks,
            file_name: fragment.file_name.clone(),
            file_type: fragment.file_type.clone(),
            student_id: fragment.student_id,
            submission_id: fragment.submission_id,
            payload: general_purpose::STANDARD.encode(&fragment.payload),
        }
    }
}
