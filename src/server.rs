//! HTTP surface.
//!
//! Multipart plumbing around the [`Dispatcher`]: one POST route per operation,
//! a health probe, CORS for the browser client, and a request log line.
//!
//! Uploads are streamed chunk by chunk so the per-file limit is enforced
//! before a whole oversized file is buffered. Dispatch is CPU-bound and runs
//! on tokio's blocking pool.

use crate::config::ServiceConfig;
use crate::dispatch::Dispatcher;
use crate::error::{TransformError, UploadError};
use crate::imaging::ImageBackend;
use crate::request::{Params, TransformOutput, UploadedImage, Uploads};
use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{DefaultBodyLimit, MatchedPath, Multipart, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Routes served, each named after the operation it dispatches.
pub const ROUTES: [&str; 6] = [
    "/resize",
    "/convert",
    "/rotate",
    "/optimize",
    "/effects",
    "/composite",
];

/// Headroom for form fields and multipart framing on top of the two files.
const BODY_OVERHEAD: usize = 1024 * 1024;

pub struct AppState<B> {
    dispatcher: Arc<Dispatcher<B>>,
    max_file_size: usize,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            max_file_size: self.max_file_size,
        }
    }
}

/// Build the application router.
pub fn router<B: ImageBackend + 'static>(
    dispatcher: Arc<Dispatcher<B>>,
    config: &ServiceConfig,
) -> Router {
    let max_file_size = config.uploads.max_file_size;
    let state = AppState {
        dispatcher,
        max_file_size,
    };
    let allowed_origin = match config.cors.allowed_origin.as_str() {
        "" => None,
        origin => HeaderValue::from_str(origin).ok(),
    };

    let mut app = Router::new();
    for route in ROUTES {
        app = app.route(route, post(transform::<B>));
    }
    app.route("/health", get(health))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(
            max_file_size.saturating_mul(2).saturating_add(BODY_OVERHEAD),
        ))
        .layer(middleware::from_fn(log_requests))
        .layer(middleware::from_fn_with_state(allowed_origin, cors))
        .with_state(state)
}

/// Bind `config.server` and serve until Ctrl-C.
pub async fn serve<B: ImageBackend + 'static>(
    dispatcher: Arc<Dispatcher<B>>,
    config: &ServiceConfig,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.server.bind_addr()).await?;
    serve_on(listener, dispatcher, config).await
}

/// Serve on an already bound listener until Ctrl-C.
pub async fn serve_on<B: ImageBackend + 'static>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<B>>,
    config: &ServiceConfig,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "server listening");
    axum::serve(listener, router(dispatcher, config))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn not_found() -> AppError {
    AppError::NotFound
}

async fn transform<B: ImageBackend + 'static>(
    State(state): State<AppState<B>>,
    path: MatchedPath,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let operation = path.as_str().trim_start_matches('/').to_string();
    // A body that is not multipart carries no files; the dispatcher reports
    // the missing upload.
    let (params, uploads) = match multipart {
        Ok(multipart) => read_form(multipart, state.max_file_size).await?,
        Err(rejection) => {
            debug!(operation = %operation, error = %rejection, "body is not multipart");
            (Params::new(), Uploads::default())
        }
    };
    debug!(
        operation = %operation,
        fields = ?params,
        image_bytes = uploads.image.as_ref().map(|u| u.data.len()),
        overlay_bytes = uploads.overlay.as_ref().map(|u| u.data.len()),
        "form received"
    );

    let dispatcher = Arc::clone(&state.dispatcher);
    let output = tokio::task::spawn_blocking(move || {
        dispatcher.dispatch(&operation, &params, &uploads)
    })
    .await
    .map_err(|e| AppError::Internal(format!("transform task failed: {e}")))??;

    Ok(image_response(output))
}

fn image_response(output: TransformOutput) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(output.content_type()),
    );
    if let Some(name) = &output.filename {
        match HeaderValue::from_str(&format!("attachment; filename={name}")) {
            Ok(value) => {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            Err(_) => warn!(filename = %name, "filename not representable in header"),
        }
    }
    (StatusCode::OK, headers, output.bytes).into_response()
}

/// Split a multipart body into text fields and the `image`/`overlay` files.
///
/// An oversized file does not abort the read: the rest of the body is
/// drained so the client receives the 400 instead of a reset connection.
async fn read_form(
    mut multipart: Multipart,
    max_file_size: usize,
) -> Result<(Params, Uploads), UploadError> {
    let mut params = Params::new();
    let mut uploads = Uploads::default();
    let mut too_large = false;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Multipart(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" | "overlay" => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                match read_file(&mut field, max_file_size).await? {
                    Some(data) => {
                        let upload = UploadedImage {
                            data,
                            content_type,
                            filename,
                        };
                        if name == "image" {
                            uploads.image = Some(upload);
                        } else {
                            uploads.overlay = Some(upload);
                        }
                    }
                    None => too_large = true,
                }
            }
            _ if field.file_name().is_some() => {
                return Err(UploadError::Multipart(format!(
                    "Unexpected field '{name}'"
                )));
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| UploadError::Multipart(e.body_text()))?;
                params.insert(name, value);
            }
        }
    }

    if too_large {
        return Err(UploadError::FileTooLarge);
    }
    Ok((params, uploads))
}

/// Read one file field; `None` once it exceeds `limit` (the rest is drained).
async fn read_file(field: &mut Field<'_>, limit: usize) -> Result<Option<Bytes>, UploadError> {
    let mut buf = BytesMut::new();
    let mut exceeded = false;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| UploadError::Multipart(e.body_text()))?
    {
        if exceeded {
            continue;
        }
        if buf.len() + chunk.len() > limit {
            exceeded = true;
            buf = BytesMut::new();
            continue;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((!exceeded).then(|| buf.freeze()))
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Single-origin CORS: POST with `Content-Type`, preflight answered with 204.
async fn cors(
    State(origin): State<Option<HeaderValue>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(origin) = origin else {
        return next.run(req).await;
    };

    let mut response = if req.method() == Method::OPTIONS {
        let mut preflight = StatusCode::NO_CONTENT.into_response();
        let headers = preflight.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
        preflight
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    response
}

#[derive(Debug)]
pub enum AppError {
    Transform(TransformError),
    Upload(UploadError),
    NotFound,
    Internal(String),
}

impl From<TransformError> for AppError {
    fn from(err: TransformError) -> Self {
        if err.is_client_error() {
            warn!(kind = err.kind(), error = %err, "request rejected");
        } else {
            error!(kind = err.kind(), error = %err, "image processing failed");
        }
        AppError::Transform(err)
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        warn!(error = %err, "file upload error");
        AppError::Upload(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Transform(err) => {
                let status = if err.is_client_error() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, err.to_string())
            }
            AppError::Upload(err) => (
                StatusCode::BAD_REQUEST,
                format!("File upload error: {err}"),
            ),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Internal(msg) => {
                error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Image processing failed".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
