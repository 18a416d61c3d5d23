//! Upload, reassembly and download services.

pub mod chunk_buffer;
pub mod chunk_splitter;
pub mod file_service;
pub mod lookup;
pub mod metadata_recorder;
pub mod metadata_store;
pub mod reassembler;
pub mod upload_coordinator;

#[cfg(test)]
pub mod test_support;
