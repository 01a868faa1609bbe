//! HTTP server.
//!
//! Thin axum layer over [`App`]: each handler parses its inputs, calls one
//! service operation, and maps the outcome to JSON (or JPEG bytes).
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/register` | no | Create a user from `{username, password}` |
//! | `POST` | `/login` | no | Check Basic credentials |
//! | `GET`  | `/health` | no | Health check (returns version) |
//! | `POST` | `/upload` | yes | Multipart upload, field `file` |
//! | `GET`  | `/pdfs` | yes | List documents |
//! | `GET`  | `/pdfs/{id}` | yes | Document and its sentences |
//! | `DELETE` | `/pdfs/{id}` | yes | Delete document, blob, and sentences |
//! | `GET`  | `/search?keyword=` | yes | Case-insensitive sentence search |
//! | `GET`  | `/pdfs/{id}/page/{page}` | yes | Page rendered as JPEG |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "document not found: 7" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `conflict` (409), `unprocessable` (422), `storage_unavailable` (503),
//! `internal` (500).

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::config::Config;
use crate::error::PipelineError;
use crate::ingest::validate_file_name;
use crate::models::{Document, DocumentDetail, Principal, SearchResponse};

/// Multipart uploads larger than this are rejected before reaching the coordinator.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

type AppState = Arc<App>;

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = App::connect(config).await?;
    let bind_addr = config.server.bind.clone();
    let router = build_router(Arc::new(app));

    tracing::info!("listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/upload", post(handle_upload))
        .route("/pdfs", get(handle_list))
        .route("/pdfs/{id}", get(handle_get).delete(handle_delete))
        .route("/pdfs/{id}/page/{page}", get(handle_page))
        .route("/search", get(handle_search))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/register", post(handle_register))
        .route("/login", post(handle_login))
        .route("/health", get(handle_health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        });
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Basic realm=\"folio\"")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized() -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", "invalid credentials")
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        use PipelineError::*;

        let (status, code) = match &err {
            InvalidArgument(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ExtractionFailed { .. } | RenderFailed(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable")
            }
            StorageWriteFailed { .. }
            | StorageReadFailed { .. }
            | StorageDeleteFailed { .. }
            | MetadataWriteFailed { .. }
            | MetadataReadFailed(_)
            | MetadataDeleteFailed { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
            Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status.is_server_error() {
            tracing::error!(error = %err, consistency = ?err.consistency(), "request failed");
        }
        AppError::new(status, code, err.to_string())
    }
}

// ============ Auth ============

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = authorization(request.headers());
    let principal = state
        .gate
        .authenticate(header.as_deref())
        .await
        .map_err(|_| unauthorized())?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
}

fn message(message: &'static str) -> Json<MessageResponse> {
    Json(MessageResponse { message, id: None })
}

#[derive(Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn handle_register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    let principal = state.gate.register(&req.username, &req.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "user registered successfully",
            id: Some(principal.id),
        }),
    ))
}

async fn handle_login(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AppError> {
    let header = authorization(&headers);
    state
        .gate
        .login(header.as_deref())
        .await
        .map_err(|_| unauthorized())?;
    Ok(message("login successful"))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Documents ============

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .map_err(|_| bad_request(format!("invalid document id '{}'", raw)))
}

async fn handle_upload(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, AppError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        validate_file_name(&file_name)?;

        // Spool the part to disk chunk by chunk; the artifact is removed on
        // every exit from this handler.
        let artifact = state.ingest.stage()?;
        {
            let mut out = artifact.writer().await.map_err(PipelineError::from)?;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| bad_request(e.body_text()))?
            {
                out.write_all(&chunk).await.map_err(PipelineError::from)?;
            }
            out.flush().await.map_err(PipelineError::from)?;
        }

        let id = state.ingest.upload_artifact(&file_name, artifact).await?;
        tracing::info!(id, user = %principal.username, file_name = %file_name, "upload accepted");
        return Ok(Json(MessageResponse {
            message: "file uploaded successfully",
            id: Some(id),
        }));
    }
    Err(bad_request("multipart field 'file' is required"))
}

async fn handle_list(State(state): State<AppState>) -> Result<Json<Vec<Document>>, AppError> {
    Ok(Json(state.retrieve.list().await?))
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetail>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.retrieve.get_by_id(id).await?))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_id(&id)?;
    state.ingest.delete(id).await?;
    Ok(message("PDF and related data deleted successfully"))
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    keyword: String,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    Ok(Json(state.retrieve.search(&params.keyword).await?))
}

async fn handle_page(
    State(state): State<AppState>,
    Path((id, page)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let jpeg = state.retrieve.page_image(id, &page).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessGate;
    use crate::blob::{BlobStore, MemoryBlobStore};
    use crate::extract::PlainTextExtractor;
    use crate::render::{PageRasterizer, RenderError};
    use crate::store::memory::InMemoryStore;
    use argon2::Params;
    use axum::body::{to_bytes, Body};
    use axum::http::Method;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use image::RgbImage;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// One page per byte of the stored blob.
    struct BytePages;

    impl PageRasterizer for BytePages {
        fn render_page(&self, bytes: &[u8], page: usize) -> Result<RgbImage, RenderError> {
            if page > bytes.len() {
                return Err(RenderError::PageOutOfRange {
                    page,
                    count: bytes.len(),
                });
            }
            Ok(RgbImage::new(2, 2))
        }
    }

    struct Harness {
        router: Router,
        blobs: Arc<MemoryBlobStore>,
        auth: String,
        tmp: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let blobs = Arc::new(MemoryBlobStore::with_bucket("pdfs"));
        let store = Arc::new(InMemoryStore::new());
        let gate = AccessGate::with_params(store.clone(), Params::new(8, 1, 1, None).unwrap());
        gate.register("alice", "hunter2").await.unwrap();

        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.ingest.temp_dir = Some(tmp.path().to_path_buf());

        let app = App::from_parts(
            &config,
            blobs.clone(),
            store,
            Arc::new(PlainTextExtractor),
            Arc::new(BytePages),
        )
        .with_gate(gate);

        Harness {
            router: build_router(Arc::new(app)),
            blobs,
            auth: format!("Basic {}", STANDARD.encode("alice:hunter2")),
            tmp,
        }
    }

    async fn send(router: &Router, request: axum::http::Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, body.to_vec())
    }

    fn get(uri: &str, auth: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::AUTHORIZATION, auth)
            .body(Body::empty())
            .expect("request")
    }

    fn upload_request(auth: &str, file_name: &str, content: &[u8]) -> axum::http::Request<Body> {
        let boundary = "folio-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        axum::http::Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(header::AUTHORIZATION, auth)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    fn json_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_needs_no_credentials() {
        let h = harness().await;
        let request = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["status"], "ok");
    }

    #[tokio::test]
    async fn protected_routes_deny_uniformly() {
        let h = harness().await;
        let wrong = format!("Basic {}", STANDARD.encode("alice:wrong"));
        let unknown = format!("Basic {}", STANDARD.encode("bob:hunter2"));
        for auth in [wrong.as_str(), unknown.as_str(), "Bearer token"] {
            let (status, body) = send(&h.router, get("/pdfs", auth)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(json_body(&body)["error"]["code"], "unauthorized");
        }
    }

    #[tokio::test]
    async fn upload_then_get_search_and_delete() {
        let h = harness().await;
        let (status, body) = send(
            &h.router,
            upload_request(&h.auth, "a.pdf", b"Hello world. Second page.\x0cFinal."),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = json_body(&body)["id"].as_i64().unwrap();

        let (status, body) = send(&h.router, get(&format!("/pdfs/{id}"), &h.auth)).await;
        assert_eq!(status, StatusCode::OK);
        let detail = json_body(&body);
        assert_eq!(detail["pdf"]["file_name"], "a.pdf");
        assert_eq!(
            detail["sentences"],
            json!(["Hello world", " Second page", "", "Final", ""])
        );

        let (status, body) = send(&h.router, get("/search?keyword=SECOND", &h.auth)).await;
        assert_eq!(status, StatusCode::OK);
        let found = json_body(&body);
        assert_eq!(found["occurrences"], 1);
        assert_eq!(found["sentences"][0]["pdf_id"], id);

        let request = axum::http::Request::builder()
            .method(Method::DELETE)
            .uri(format!("/pdfs/{id}"))
            .header(header::AUTHORIZATION, &h.auth)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.blobs.list_keys("pdfs").await.unwrap().is_empty());

        let (status, body) = send(&h.router, get(&format!("/pdfs/{id}"), &h.auth)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_body(&body)["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn streamed_upload_leaves_no_spool_file() {
        let h = harness().await;
        let body = "Chunked body. ".repeat(10_000);
        let (status, _) = send(&h.router, upload_request(&h.auth, "big.pdf", body.as_bytes())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.blobs.object("pdfs", "big.pdf").unwrap(), body.as_bytes());

        let (status, _) = send(&h.router, upload_request(&h.auth, "..", b"x.")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        h.blobs.fail_puts(true);
        let (status, _) = send(&h.router, upload_request(&h.auth, "c.pdf", b"x.")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(std::fs::read_dir(h.tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_keyword_is_bad_request() {
        let h = harness().await;
        let (status, body) = send(&h.router, get("/search", &h.auth)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&body)["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn page_route_serves_jpeg_and_rejects_bad_pages() {
        let h = harness().await;
        let (_, body) = send(&h.router, upload_request(&h.auth, "a.pdf", b"two.")).await;
        let id = json_body(&body)["id"].as_i64().unwrap();

        let response = h
            .router
            .clone()
            .oneshot(get(&format!("/pdfs/{id}/page/1"), &h.auth))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

        let (status, _) = send(&h.router, get(&format!("/pdfs/{id}/page/abc"), &h.auth)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&h.router, get(&format!("/pdfs/{id}/page/99"), &h.auth)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_body(&body)["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn blob_outage_is_service_unavailable() {
        let h = harness().await;
        h.blobs.fail_puts(true);
        let (status, body) = send(&h.router, upload_request(&h.auth, "a.pdf", b"x.")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(&body)["error"]["code"], "storage_unavailable");
    }

    #[tokio::test]
    async fn register_and_login() {
        let h = harness().await;
        let register = |payload: Value| {
            axum::http::Request::builder()
                .method(Method::POST)
                .uri("/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap()
        };

        let (status, _) = send(&h.router, register(json!({"username": "bob", "password": "pw"}))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) =
            send(&h.router, register(json!({"username": "bob", "password": "other"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json_body(&body)["error"]["code"], "conflict");

        let login = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(header::AUTHORIZATION, format!("Basic {}", STANDARD.encode("bob:pw")))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.router, login).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["message"], "login successful");
    }
}
