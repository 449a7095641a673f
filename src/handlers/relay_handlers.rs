//! HTTP handlers for the relay endpoints.
//! Streams payloads in both directions to avoid buffering whole files in
//! memory and delegates lifetime/quota concerns to `RelayService`.

use crate::{errors::AppError, models::file_entry::FileEntry, state::AppState};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::json;
use std::io;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// POST `/upload` — accept one file as multipart form data.
///
/// The first field named `file` is streamed straight into the blob store;
/// everything else in the form is ignored. Responds with the download
/// handle, the link built from the configured base URL, the expiry, and the
/// download quota.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or("upload.bin")
            .to_string();

        let stream =
            field.map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));
        let entry = state.relay.admit(&original_name, None, stream).await?;

        let download_url = format!("{}/download/{}", state.base_url, entry.id);
        return Ok(Json(json!({
            "id": entry.id,
            "download_url": download_url,
            "expires_at": entry.expires_at,
            "download_limit": entry.download_limit,
        })));
    }

    Err(AppError::new(StatusCode::BAD_REQUEST, "no file uploaded"))
}

/// GET `/download/{id}` — consume one download and stream the file back.
///
/// When this retrieval uses the last allowed download, blob removal is
/// scheduled after the grace delay; the registry record is already gone, so
/// no further download can begin meanwhile.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_handle(&id)?;
    let (entry, exhausted) = state.relay.consume(id).await?;
    let file = state.relay.open_blob(&entry).await?;
    if exhausted {
        state.relay.schedule_removal(&entry);
    }

    let stream = ReaderStream::new(file);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &entry);
    Ok(response)
}

/// GET `/info/{id}` — metadata snapshot without consuming a download.
pub async fn file_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileEntry>, AppError> {
    let id = parse_handle(&id)?;
    let entry = state.relay.inspect(id)?;
    Ok(Json(entry))
}

/// The handle is a capability token: an unparseable one gets the same
/// not-found answer as an unknown one.
fn parse_handle(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::not_found("file not found or expired"))
}

fn set_download_headers(headers: &mut HeaderMap, entry: &FileEntry) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&entry.size_bytes.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_filename(&entry.original_name)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    let quoted = format!("\"{}\"", entry.etag);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }
}

/// Keep the attachment filename header-safe: no quotes, control characters,
/// or path separators.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
