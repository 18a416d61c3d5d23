//! Re-splits a stored artifact into fixed-size fragments for download.

use crate::{
    errors::{UploadError, UploadResult},
    models::{file_metadata::FileMetadata, fragment::FragmentEnvelope},
    services::metadata_recorder::MetadataRecorder,
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, stream};
use std::{
    io::{self, ErrorKind, SeekFrom},
    pin::Pin,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::debug;

pub type FragmentStream = Pin<Box<dyn Stream<Item = UploadResult<FragmentEnvelope>> + Send>>;

#[derive(Clone)]
pub struct ChunkSplitter {
    recorder: MetadataRecorder,
    default_chunk_size: usize,
}

/// `ceil(file_size / chunk_size)`; zero for an empty file.
pub fn chunk_count(file_size: u64, chunk_size: usize) -> i64 {
    file_size.div_ceil(chunk_size as u64) as i64
}

impl ChunkSplitter {
    pub fn new(recorder: MetadataRecorder, default_chunk_size: usize) -> Self {
        Self {
            recorder,
            default_chunk_size,
        }
    }

    /// Open the artifact for `id` and return a lazy stream of its fragments.
    ///
    /// Every call opens the artifact again and starts at byte 0, so a stream
    /// can be restarted by calling this again. The record is looked up and the
    /// file opened before returning; reads happen as the stream is polled.
    pub async fn split_for_download(
        &self,
        id: i64,
        chunk_size: Option<usize>,
    ) -> UploadResult<FragmentStream> {
        let chunk_size = self.resolve_chunk_size(chunk_size)?;
        let (record, file) = self.open_artifact(id).await?;

        let file_size = record.file_size.max(0) as u64;
        let total_chunks = chunk_count(file_size, chunk_size);
        debug!(file_id = id, chunk_size, total_chunks, "splitting artifact");

        let state = SplitState {
            file,
            record,
            chunk_size,
            total_chunks,
            next_index: 0,
            remaining: file_size,
        };

        let fragments = stream::try_unfold(state, |mut state| async move {
            if state.next_index >= state.total_chunks {
                return Ok::<_, UploadError>(None);
            }
            let len = state.remaining.min(state.chunk_size as u64) as usize;
            let payload = read_payload(&mut state.file, len).await?;
            let fragment = envelope(&state.record, state.next_index, state.total_chunks, payload);
            state.next_index += 1;
            state.remaining -= len as u64;
            Ok(Some((fragment, state)))
        });

        Ok(Box::pin(fragments))
    }

    /// Read a single fragment by index without reading the ones before it.
    pub async fn fetch_chunk(
        &self,
        id: i64,
        chunk_index: i64,
        chunk_size: Option<usize>,
    ) -> UploadResult<FragmentEnvelope> {
        let chunk_size = self.resolve_chunk_size(chunk_size)?;
        let (record, mut file) = self.open_artifact(id).await?;

        let file_size = record.file_size.max(0) as u64;
        let total_chunks = chunk_count(file_size, chunk_size);
        if chunk_index < 0 || chunk_index >= total_chunks {
            return Err(UploadError::BadIndex {
                index: chunk_index,
                total: total_chunks,
            });
        }

        let offset = chunk_index as u64 * chunk_size as u64;
        let len = (file_size - offset).min(chunk_size as u64) as usize;
        file.seek(SeekFrom::Start(offset)).await?;
        let payload = read_payload(&mut file, len).await?;

        Ok(envelope(&record, chunk_index, total_chunks, payload))
    }

    /// The record for `id` together with an open handle to its artifact.
    ///
    /// A missing record is `NotFound`; a record whose artifact is gone is a
    /// storage error and the record is left alone.
    pub async fn open_artifact(&self, id: i64) -> UploadResult<(FileMetadata, File)> {
        let record = self.recorder.require(id).await?;
        let file = File::open(&record.storage_path).await?;
        Ok((record, file))
    }

    fn resolve_chunk_size(&self, requested: Option<usize>) -> UploadResult<usize> {
        match requested.unwrap_or(self.default_chunk_size) {
            0 => Err(UploadError::InvalidChunkSize),
            size => Ok(size),
        }
    }
}

struct SplitState {
    file: File,
    record: FileMetadata,
    chunk_size: usize,
    total_chunks: i64,
    next_index: i64,
    remaining: u64,
}

/// Read exactly `len` bytes; an early EOF means the artifact is shorter than
/// its record says.
async fn read_payload(file: &mut File, len: usize) -> UploadResult<Bytes> {
    let mut buf = BytesMut::zeroed(len);
    match file.read_exact(&mut buf).await {
        Ok(_) => Ok(buf.freeze()),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(UploadError::Storage(
            io::Error::new(ErrorKind::UnexpectedEof, "artifact shorter than recorded size"),
        )),
        Err(err) => Err(UploadError::Storage(err)),
    }
}

fn envelope(
    record: &FileMetadata,
    chunk_index: i64,
    total_chunks: i64,
    payload: Bytes,
) -> FragmentEnvelope {
    FragmentEnvelope {
        file_id: record.id,
        chunk_index,
        total_chunks,
        payload,
        file_name: record.file_name.clone(),
        file_type: record.file_type.clone(),
        student_id: record.student_id,
        submission_id: record.submission_id,
    }
}
