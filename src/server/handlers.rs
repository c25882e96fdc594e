//! HTTP request handlers.

use crate::auth::Credentials;
use crate::error::{AppError, Result};
use crate::opds;
use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

/// Build a response, returning 500 on error (which shouldn't happen).
fn build_response(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal error"))
                .unwrap_or_default()
        })
}

/// Run store work that touches archives or hashes off the async runtime.
pub(super) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))?
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

/// HTTP Basic authentication for every OPDS route.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let credentials = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(Credentials::from_header)
        .ok_or(AppError::Unauthorized)?;

    let db = state.db.clone();
    let name = credentials.name.clone();
    let valid = blocking(move || db.authenticate(&credentials.name, &credentials.password)).await?;

    if !valid {
        tracing::debug!(user = %name, "Authentication failed");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

// ============================================================================
// OPDS CATALOG
// ============================================================================

/// OpenSearch description.
pub async fn opensearch(State(state): State<AppState>) -> Response {
    build_response(
        StatusCode::OK,
        opds::OPENSEARCH_TYPE,
        state.opensearch().to_string(),
    )
}

/// Catalog query parameters.
#[derive(Debug, Deserialize)]
pub struct CatalogParams {
    search: Option<String>,
}

/// Root catalog feed, optionally filtered by a fuzzy title search.
pub async fn catalog(
    State(state): State<AppState>,
    Query(params): Query<CatalogParams>,
) -> Result<Response> {
    let mut series = state.db.list_series()?;

    if let Some(term) = params.search.as_deref().filter(|t| !t.trim().is_empty()) {
        series = opds::filter_series(series, term);
        tracing::debug!(term = %term, matches = series.len(), "Catalog search");
    }

    let xml = opds::catalog_feed(&series, &state.feed);
    Ok(build_response(StatusCode::OK, opds::NAVIGATION_TYPE, xml))
}

/// Acquisition feed of one series.
pub async fn series(State(state): State<AppState>, Path(sid): Path<String>) -> Result<Response> {
    let series = state
        .db
        .get_series(&sid)?
        .ok_or_else(|| AppError::NotFound(format!("series {}", sid)))?;
    let entries = state.db.list_entries(&sid)?;

    let xml = opds::series_feed(&series, &entries, &state.feed);
    Ok(build_response(StatusCode::OK, opds::ACQUISITION_TYPE, xml))
}

// ============================================================================
// ENTRY CONTENT
// ============================================================================

/// Raw archive download.
pub async fn archive(
    State(state): State<AppState>,
    Path((sid, eid)): Path<(String, String)>,
) -> Result<Response<Body>> {
    let entry = state.db.require_entry(&sid, &eid)?;
    let content_type = entry
        .kind()
        .map(|k| k.mime_type(entry.archive_path()))
        .unwrap_or("application/octet-stream");

    let file = tokio::fs::File::open(entry.archive_path()).await?;
    let length = file.metadata().await?.len();
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let content_disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&entry.file_name())
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .header(header::CONTENT_LENGTH, length)
        .body(body)
        .unwrap_or_else(|_| Response::default()))
}

/// Cover query parameters.
#[derive(Debug, Deserialize)]
pub struct CoverParams {
    #[serde(default)]
    thumbnail: bool,
}

/// Cover image, or its cached thumbnail.
pub async fn cover(
    State(state): State<AppState>,
    Path((sid, eid)): Path<(String, String)>,
    Query(params): Query<CoverParams>,
) -> Result<Response<Body>> {
    let db = state.db.clone();
    let (data, mime) = if params.thumbnail {
        blocking(move || db.get_thumbnail(&sid, &eid)).await?
    } else {
        blocking(move || db.get_cover(&sid, &eid)).await?
    };

    Ok(build_response(StatusCode::OK, &mime, data))
}

/// Single page by zero-based index.
pub async fn page(
    State(state): State<AppState>,
    Path((sid, eid, index)): Path<(String, String, usize)>,
) -> Result<Response<Body>> {
    let db = state.db.clone();
    let (data, mime) = blocking(move || db.get_page(&sid, &eid, index)).await?;

    Ok(build_response(StatusCode::OK, &mime, data))
}
