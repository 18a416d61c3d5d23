//! Defines routes for fragment upload, metadata and download.
//!
//! ## Structure
//! - **Upload**
//!   - `POST   /files/chunks` — submit one fragment (multipart form)
//!   - `POST   /files/{id}/replace` — delete a file so its id can be re-uploaded
//!
//! - **Files**
//!   - `GET    /files/{id}` — metadata
//!   - `DELETE /files/{id}` — delete artifact and metadata
//!   - `GET    /files/{id}/content` — whole artifact
//!   - `GET    /files/{id}/chunks` — NDJSON fragment stream (`?chunk_size=`)
//!   - `GET    /files/{id}/chunks/{index}` — one raw fragment (`?chunk_size=`)
//!   - `GET    /submissions/{id}/files` — files of a submission

use crate::{
    handlers::{
        file_handlers::{
            delete_file, download_chunk, download_chunks, download_content, get_file,
            list_submission_files, replace_file, upload_chunk,
        },
        health_handlers::{healthz, readyz},
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Fragments larger than this are refused by the multipart extractor.
const MAX_FRAGMENT_BODY: usize = 64 * 1024 * 1024;

/// Build and return the router for all file routes.
///
/// The router carries shared state (`FileService`) to all handlers.
pub fn routes() -> Router<FileService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/files/chunks",
            post(upload_chunk).layer(DefaultBodyLimit::max(MAX_FRAGMENT_BODY)),
        )
        .route("/files/{id}", get(get_file).delete(delete_file))
        .route("/files/{id}/replace", post(replace_file))
        .route("/files/{id}/content", get(download_content))
        .route("/files/{id}/chunks", get(download_chunks))
        .route("/files/{id}/chunks/{index}", get(download_chunk))
        .route("/submissions/{id}/files", get(list_submission_files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{self, STUDENT, SUBMISSION};
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    const BOUNDARY: &str = "chunk-store-form-boundary";

    async fn app() -> (Router, TempDir) {
        let dir = tempdir().unwrap();
        let db = test_support::memory_pool().await;
        test_support::seed_owner(&db, STUDENT, SUBMISSION).await;
        let service = FileService::new(db, dir.path(), Duration::from_secs(60), 4);
        (routes().with_state(service), dir)
    }

    fn chunk_form(index: i64, total: i64, student_id: i64, payload: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        let fields = [
            ("fileId", "42".to_string()),
            ("chunkIndex", index.to_string()),
            ("totalChunks", total.to_string()),
            ("fileName", "report".to_string()),
            ("fileType", "txt".to_string()),
            ("studentId", student_id.to_string()),
            ("submissionId", SUBMISSION.to_string()),
        ];
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/files/chunks")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn chunk_upload_outcomes_map_to_statuses() {
        let (app, _dir) = app().await;

        let (status, body) = send_json(&app, chunk_form(0, 3, STUDENT, b"abc")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "ACCEPTED");
        assert_eq!(body["fileId"], 42);
        assert_eq!(body["chunkIndex"], 0);

        let (status, body) = send_json(&app, chunk_form(2, 3, STUDENT, b"gh")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["outcome"], "OUT_OF_ORDER_DROPPED");

        let (status, body) = send_json(&app, chunk_form(5, 3, STUDENT, b"zz")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["outcome"], "REJECTED_BAD_INDEX");

        let (status, _) = send_json(&app, chunk_form(1, 3, STUDENT, b"def")).await;
        assert_eq!(status, StatusCode::OK);

        // unknown student fails the final fragment, which can then be resent
        let (status, body) = send_json(&app, chunk_form(2, 3, 999, b"gh")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], 422);

        let (status, body) = send_json(&app, chunk_form(2, 3, STUDENT, b"gh")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "COMPLETED");
        assert_eq!(body["metadata"]["id"], 42);
        assert_eq!(body["metadata"]["fileSize"], 8);
        assert_eq!(body["metadata"]["submissionId"], SUBMISSION);
    }

    #[tokio::test]
    async fn missing_form_field_is_a_bad_request() {
        let (app, _dir) = app().await;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/files/chunks")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"fileId\"\r\n\r\n1\r\n--{BOUNDARY}--\r\n"
            )))
            .unwrap();

        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("chunkIndex"));
    }

    #[tokio::test]
    async fn completed_file_is_served_then_deleted() {
        let (app, _dir) = app().await;
        send(&app, chunk_form(0, 2, STUDENT, b"hello ")).await;
        let (status, _) = send(&app, chunk_form(1, 2, STUDENT, b"world")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(&app, request(Method::GET, "/files/42")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fileName"], "report");
        assert_eq!(body["fileSize"], 11);

        let (status, bytes) = send(&app, request(Method::GET, "/files/42/content")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"hello world");

        let (status, bytes) = send(&app, request(Method::GET, "/files/42/chunks/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"o wo");

        let (status, bytes) = send(&app, request(Method::GET, "/files/42/chunks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 3);

        let (status, body) = send_json(
            &app,
            request(Method::GET, &format!("/submissions/{SUBMISSION}/files")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, request(Method::DELETE, "/files/42")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, request(Method::GET, "/files/42/chunks")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
