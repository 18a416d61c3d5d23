//! HTTP handlers for fragment upload, file metadata and chunked download.
//! Storage concerns are delegated to `FileService`.

use crate::{
    errors::AppError,
    models::{
        file_metadata::FileMetadata,
        fragment::{FragmentEnvelope, FragmentView},
    },
    services::{
        file_service::FileService,
        upload_coordinator::UploadOutcome,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

const X_CHUNK_INDEX: HeaderName = HeaderName::from_static("x-chunk-index");
const X_TOTAL_CHUNKS: HeaderName = HeaderName::from_static("x-total-chunks");

/// Optional chunk size override for downloads.
#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: i64,
    pub chunk_index: i64,
    #[serde(flatten)]
    pub outcome: UploadOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceResponse {
    pub file_id: i64,
    pub previous: FileMetadata,
}

/// `POST /files/chunks` — submit one fragment as a multipart form.
pub async fn upload_chunk(
    State(service): State<FileService>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let envelope = read_envelope(multipart).await?;
    let file_id = envelope.file_id;
    let chunk_index = envelope.chunk_index;

    let outcome = service.coordinator.accept_fragment(envelope).await?;
    let status = match outcome {
        UploadOutcome::Accepted | UploadOutcome::Completed(_) => StatusCode::OK,
        UploadOutcome::RejectedBadIndex => StatusCode::BAD_REQUEST,
        UploadOutcome::OutOfOrderDropped => StatusCode::CONFLICT,
    };

    let body = UploadResponse {
        file_id,
        chunk_index,
        outcome,
    };
    Ok((status, Json(body)).into_response())
}

/// Collect the form fields of one fragment.
async fn read_envelope(mut multipart: Multipart) -> Result<FragmentEnvelope, AppError> {
    let mut file_id = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut file_name = None;
    let mut file_type = None;
    let mut student_id = None;
    let mut submission_id = None;
    let mut payload: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            payload = Some(
                field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(err.body_text()))?,
            );
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;
        match name.as_str() {
            "fileId" => file_id = Some(parse_number(&name, &value)?),
            "chunkIndex" => chunk_index = Some(parse_number(&name, &value)?),
            "totalChunks" => total_chunks = Some(parse_number(&name, &value)?),
            "studentId" => student_id = Some(parse_number(&name, &value)?),
            "submissionId" => submission_id = Some(parse_number(&name, &value)?),
            "fileName" => file_name = Some(value),
            "fileType" => file_type = Some(value),
            other => tracing::debug!("ignoring unknown form field `{}`", other),
        }
    }

    Ok(FragmentEnvelope {
        file_id: require(file_id, "fileId")?,
        chunk_index: require(chunk_index, "chunkIndex")?,
        total_chunks: require(total_chunks, "totalChunks")?,
        payload: require(payload, "file")?,
        file_name: require(file_name, "fileName")?,
        file_type: require(file_type, "fileType")?,
        student_id: require(student_id, "studentId")?,
        submission_id: require(submission_id, "submissionId")?,
    })
}

fn parse_number(field: &str, value: &str) -> Result<i64, AppError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| AppError::bad_request(format!("field `{}` must be an integer", field)))
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::bad_request(format!("missing form field `{}`", field)))
}

/// `GET /files/{id}` — metadata only.
pub async fn get_file(
    State(service): State<FileService>,
    Path(id): Path<i64>,
) -> Result<Json<FileMetadata>, AppError> {
    let record = service.recorder().require(id).await?;
    Ok(Json(record))
}

/// `DELETE /files/{id}` — remove the artifact (best effort) and the record.
pub async fn delete_file(
    State(service): State<FileService>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    service.recorder().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /files/{id}/replace` — delete the current file so a new upload can
/// take its id. The new fragments are sent to `POST /files/chunks` with the
/// same `fileId`.
pub async fn replace_file(
    State(service): State<FileService>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let handle = service.coordinator.begin_replace(id).await?;
    let body = ReplaceResponse {
        file_id: handle.file_id(),
        previous: handle.previous().clone(),
    };
    Ok((StatusCode::ACCEPTED, Json(body)))
}

/// `GET /files/{id}/chunks` — every fragment as one NDJSON line, read lazily.
pub async fn download_chunks(
    State(service): State<FileService>,
    Path(id): Path<i64>,
    Query(q): Query<ChunkQuery>,
) -> Result<Response, AppError> {
    let fragments = service.splitter.split_for_download(id, q.chunk_size).await?;
    let lines = fragments.map(|fragment| {
        fragment.map(|fragment| {
            let mut line = serde_json::to_vec(&FragmentView::from(&fragment))
                .unwrap_or_else(|_| b"{}".to_vec());
            line.push(b'\n');
            Bytes::from(line)
        })
    });

    let mut response = Response::new(Body::from_stream(lines));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    Ok(response)
}

/// `GET /files/{id}/chunks/{index}` — one fragment as raw bytes.
pub async fn download_chunk(
    State(service): State<FileService>,
    Path((id, index)): Path<(i64, i64)>,
    Query(q): Query<ChunkQuery>,
) -> Result<Response, AppError> {
    let fragment = service.splitter.fetch_chunk(id, index, q.chunk_size).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(X_CHUNK_INDEX, HeaderValue::from(fragment.chunk_index));
    headers.insert(X_TOTAL_CHUNKS, HeaderValue::from(fragment.total_chunks));

    let mut response = Response::new(Body::from(fragment.payload));
    *response.headers_mut() = headers;
    Ok(response)
}

/// `GET /files/{id}/content` — the whole artifact as a streaming response.
pub async fn download_content(
    State(service): State<FileService>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let (meta, file) = service.splitter.open_artifact(id).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    set_file_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `GET /submissions/{id}/files`
pub async fn list_submission_files(
    State(service): State<FileService>,
    Path(submission_id): Path<i64>,
) -> Result<Json<Vec<FileMetadata>>, AppError> {
    let records = service.recorder().list_by_submission(submission_id).await?;
    Ok(Json(records))
}

fn set_file_headers(headers: &mut HeaderMap, meta: &FileMetadata) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.file_size.max(0)));

    let disposition = format!("attachment; filename=\"{}.{}\"", meta.file_name, meta.file_type);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    let quoted = format!("\"{}\"", meta.checksum);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_update.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support;

    #[test]
    fn upload_response_flattens_outcome() {
        let accepted = serde_json::to_value(UploadResponse {
            file_id: 4,
            chunk_index: 1,
            outcome: UploadOutcome::Accepted,
        })
        .unwrap();
        assert_eq!(accepted["outcome"], "ACCEPTED");
        assert_eq!(accepted["fileId"], 4);
        assert!(accepted.get("metadata").is_none());

        let completed = serde_json::to_value(UploadResponse {
            file_id: 4,
            chunk_index: 2,
            outcome: UploadOutcome::Completed(test_support::metadata(4, 1)),
        })
        .unwrap();
        assert_eq!(completed["outcome"], "COMPLETED");
        assert_eq!(completed["metadata"]["fileSize"], 4);
    }

    #[test]
    fn file_headers_describe_artifact() {
        let meta = test_support::metadata(3, 1);
        let mut headers = HeaderMap::new();
        set_file_headers(&mut headers, &meta);

        assert_eq!(headers[header::CONTENT_LENGTH], "4");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"file-3.txt\""
        );
        assert_eq!(headers[header::ETAG], format!("\"{}\"", meta.checksum));
    }

    #[test]
    fn numeric_fields_are_validated() {
        assert_eq!(parse_number("fileId", " 12 ").unwrap(), 12);
        let err = parse_number("chunkIndex", "two").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(require::<i64>(None, "fileId").is_err());
    }
}
