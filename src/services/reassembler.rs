//! Writes a complete `ChunkBuffer` to disk as a single artifact.

use crate::{
    errors::{UploadError, UploadResult},
    services::chunk_buffer::ChunkBuffer,
};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;

/// Facts derived while writing an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub storage_path: PathBuf,
    pub total_size: u64,
    pub checksum: String,
}

#[derive(Debug, Clone)]
pub struct Reassembler {
    /// Directory that receives every artifact.
    base_path: PathBuf,
}

impl Reassembler {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// `{base}/{name}<{file_id}>.{type}`
    pub fn artifact_path(
        &self,
        file_id: i64,
        declared_name: &str,
        declared_type: &str,
    ) -> UploadResult<PathBuf> {
        ensure_component_safe(declared_name)?;
        ensure_component_safe(declared_type)?;
        Ok(self
            .base_path
            .join(format!("{}<{}>.{}", declared_name, file_id, declared_type)))
    }

    /// Write every buffered fragment, in order, to the artifact path.
    ///
    /// Bytes go to a temporary file in the same directory which is fsynced and
    /// then renamed into place, so the artifact path never holds a truncated
    /// file. On failure the temporary file is removed and the error returned
    /// before anything is recorded.
    pub async fn finalize(
        &self,
        buffer: &ChunkBuffer,
        declared_name: &str,
        declared_type: &str,
    ) -> UploadResult<Artifact> {
        if buffer.is_empty() {
            return Err(UploadError::EmptyUpload(buffer.file_id()));
        }
        let file_path = self.artifact_path(buffer.file_id(), declared_name, declared_type)?;

        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await?;

        let mut total_size: u64 = 0;
        let mut digest = Context::new();
        for fragment in buffer.fragments() {
            if let Err(err) = file.write_all(fragment).await {
                discard(&tmp_path).await;
                return Err(UploadError::Storage(err));
            }
            digest.consume(fragment);
            total_size += fragment.len() as u64;
        }
        if let Err(err) = file.flush().await {
            discard(&tmp_path).await;
            return Err(UploadError::Storage(err));
        }
        if let Err(err) = file.sync_all().await {
            discard(&tmp_path).await;
            return Err(UploadError::Storage(err));
        }
        drop(file);

        if let Err(err) = move_into_place(&tmp_path, &file_path).await {
            discard(&tmp_path).await;
            return Err(UploadError::Storage(err));
        }

        debug!(
            file_id = buffer.file_id(),
            path = %file_path.display(),
            total_size,
            "wrote artifact"
        );

        Ok(Artifact {
            storage_path: file_path,
            total_size,
            checksum: format!("{:x}", digest.compute()),
        })
    }
}

/// Rename the temp file over the artifact path. Platforms that refuse to
/// rename onto an existing file get the old artifact removed first.
async fn move_into_place(tmp_path: &Path, file_path: &Path) -> io::Result<()> {
    match fs::rename(tmp_path, file_path).await {
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(file_path).await?;
            fs::rename(tmp_path, file_path).await
        }
        other => other,
    }
}

async fn discard(tmp_path: &Path) {
    if let Err(err) = fs::remove_file(tmp_path).await {
        if err.kind() != io::ErrorKind::NotFound {
            debug!("failed to remove temp file {}: {}", tmp_path.display(), err);
        }
    }
}

/// Reject names that could leave the base directory or break the path format.
///
/// Separators are refused outright, so the only way to spell a `.` or `..`
/// component is a leading dot. Leading dots also keep artifacts from
/// colliding with the `.tmp-` files written next to them.
fn ensure_component_safe(value: &str) -> UploadResult<()> {
    if value.is_empty() || value.len() > MAX_NAME_LEN {
        return Err(UploadError::InvalidFileName);
    }
    if value.starts_with('.') {
        return Err(UploadError::InvalidFileName);
    }
    if value
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\' || b == b'\0')
    {
        return Err(UploadError::InvalidFileName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn buffer_with(file_id: i64, parts: &[&'static [u8]]) -> ChunkBuffer {
        let mut buffer = ChunkBuffer::new(file_id, parts.len() as i64);
        for part in parts {
            buffer.push(Bytes::from_static(part));
        }
        buffer
    }

    #[tokio::test]
    async fn writes_fragments_in_order() {
        let dir = tempdir().unwrap();
        let reassembler = Reassembler::new(dir.path().join("nested/files"));
        let buffer = buffer_with(42, &[b"abcd", b"efgh", b"ij"]);

        let artifact = reassembler.finalize(&buffer, "essay", "txt").await.unwrap();

        assert_eq!(artifact.total_size, 10);
        assert_eq!(
            artifact.storage_path,
            dir.path().join("nested/files").join("essay<42>.txt")
        );
        assert_eq!(
            tokio::fs::read(&artifact.storage_path).await.unwrap(),
            b"abcdefghij"
        );
        assert_eq!(artifact.checksum, format!("{:x}", md5::compute(b"abcdefghij")));
    }

    #[tokio::test]
    async fn empty_buffer_is_rejected() {
        let dir = tempdir().unwrap();
        let reassembler = Reassembler::new(dir.path());
        let buffer = ChunkBuffer::new(3, 2);

        let err = reassembler.finalize(&buffer, "a", "b").await.unwrap_err();
        assert!(matches!(err, UploadError::EmptyUpload(3)));
    }

    #[tokio::test]
    async fn rewriting_replaces_previous_artifact() {
        let dir = tempdir().unwrap();
        let reassembler = Reassembler::new(dir.path());

        reassembler
            .finalize(&buffer_with(1, &[b"old content"]), "f", "bin")
            .await
            .unwrap();
        let artifact = reassembler
            .finalize(&buffer_with(1, &[b"new"]), "f", "bin")
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&artifact.storage_path).await.unwrap(), b"new");
        // no temp files left behind
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["f<1>.bin".to_string()]);
    }

    #[tokio::test]
    async fn unwritable_base_dir_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        tokio::fs::write(&blocker, b"x").await.unwrap();
        let reassembler = Reassembler::new(&blocker);

        let err = reassembler
            .finalize(&buffer_with(1, &[b"data"]), "f", "bin")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Storage(_)));
    }

    #[tokio::test]
    async fn failed_rename_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let reassembler = Reassembler::new(dir.path());
        // a non-empty directory sitting on the artifact path cannot be replaced
        let occupied = dir.path().join("f<1>.bin");
        tokio::fs::create_dir(&occupied).await.unwrap();
        tokio::fs::write(occupied.join("keep"), b"x").await.unwrap();

        let err = reassembler
            .finalize(&buffer_with(1, &[b"data"]), "f", "bin")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Storage(_)));

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["f<1>.bin".to_string()]);
    }

    #[test]
    fn unsafe_names_are_rejected() {
        let reassembler = Reassembler::new("/srv/files");
        for name in [
            "",
            ".",
            "..",
            "../etc/passwd",
            ".hidden",
            "a/b",
            "a/../b",
            "a\\b",
            "bad\nname",
        ] {
            assert!(
                matches!(
                    reassembler.artifact_path(1, name, "txt"),
                    Err(UploadError::InvalidFileName)
                ),
                "accepted {name:?}"
            );
        }
        assert!(reassembler.artifact_path(1, "notes", "../x").is_err());
        assert!(reassembler.artifact_path(1, "lab report v2", "pdf").is_ok());
        assert!(reassembler.artifact_path(1, "draft..v2", "tar.gz").is_ok());
        assert!(reassembler.artifact_path(1, "ends with dots..", "txt").is_ok());
    }
}
