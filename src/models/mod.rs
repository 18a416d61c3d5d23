//! Core data models for the chunked upload service.
//!
//! `FileMetadata` maps to the `file_metadata` table via `sqlx::FromRow`;
//! `Student` and `Submission` are read-only views of entities owned by the
//! rest of the platform. `FragmentEnvelope` is the transient unit exchanged
//! on both the upload and the download path.

pub mod file_metadata;
pub mod fragment;
pub mod owner;
