//! HTTP handlers for file upload, retrieval, signed URLs, deletion, and
//! on-demand scanning. Authorization identity comes from the `x-user-id`
//! header; all storage concerns are delegated to `StorageService`.

use crate::{
    errors::AppError,
    models::file_record::FileRecord,
    routes::routes::AppState,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_URL_TTL_SECS: u64 = 900;
const MAX_URL_TTL_SECS: u64 = 7 * 24 * 3600;

/// Query params accepted by `GET /files/{id}/url`.
#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    /// Lifetime in seconds. Defaults to 15 minutes, capped at 7 days.
    pub ttl: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct FileResponse {
    #[serde(flatten)]
    pub record: FileRecord,
    pub public_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    pub url: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub clean: bool,
    pub threats: Vec<String>,
}

fn requester_id(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "missing x-user-id header"))
}

/// Upload a file via `POST /files` (multipart).
///
/// Expected parts: `file` (the payload, with filename and content type) and
/// an optional `public` flag. The scan runs in the background; the record
/// comes back `unscanned`.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let owner_id = requester_id(&headers)?.to_string();

    let mut file: Option<(String, String, Bytes)> = None;
    let mut is_public = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("reading multipart body: {err}")))?
    {
        match field.name() {
            Some("file") => {
                let original_name = field
                    .file_name()
                    .unwrap_or("upload.bin")
                    .to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(format!("reading file part: {err}")))?;
                file = Some((original_name, mime_type, data));
            }
            Some("public") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("reading public flag: {err}")))?;
                is_public = value == "1" || value.eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }

    let (original_name, mime_type, data) =
        file.ok_or_else(|| AppError::bad_request("multipart body is missing a `file` part"))?;

    let record = state
        .storage
        .upload(data.clone(), &original_name, &mime_type, &owner_id, is_public)
        .await?;

    // Scan without blocking the upload response.
    state.scanner.scan_detached(&record, data);

    let public_url = state.storage.public_url(&record);
    Ok((
        StatusCode::CREATED,
        Json(FileResponse { record, public_url }),
    ))
}

/// `GET /files/{id}` — metadata only. Same read authorization as download.
pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<FileResponse>, AppError> {
    let requester = requester_id(&headers)?;
    let record = state.storage.find_record(file_id).await?;
    if !record.is_public && record.owner_id != requester {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            format!("requester may not read file {file_id}"),
        ));
    }
    let public_url = state.storage.public_url(&record);
    Ok(Json(FileResponse { record, public_url }))
}

/// `GET /files/{id}/download` — fetch the bytes from the backend.
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let requester = requester_id(&headers)?;
    let (record, data) = state.storage.download(file_id, requester).await?;

    let mut response = Response::new(Body::from(data));
    let resp_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&record.mime_type) {
        resp_headers.insert(header::CONTENT_TYPE, value);
    }
    let disposition = format!(
        "attachment; filename=\"{}\"",
        record.original_name.replace('"', "")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        resp_headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `GET /files/{id}/url?ttl=SECONDS` — mint a time-bounded signed URL.
pub async fn file_url(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Query(query): Query<SignedUrlQuery>,
    headers: HeaderMap,
) -> Result<Json<SignedUrlResponse>, AppError> {
    let requester = requester_id(&headers)?;
    let ttl_secs = query
        .ttl
        .unwrap_or(DEFAULT_URL_TTL_SECS)
        .min(MAX_URL_TTL_SECS)
        .max(1);

    let url = state
        .storage
        .signed_url(file_id, requester, Duration::from_secs(ttl_secs))
        .await?;
    Ok(Json(SignedUrlResponse {
        url,
        expires_in: ttl_secs,
    }))
}

/// `DELETE /files/{id}` — backend delete, then soft-delete of the record.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let requester = requester_id(&headers)?;
    state.storage.delete(file_id, requester).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /files/{id}/scan` — rescan a stored file on demand. The body is
/// ignored; the bytes are re-fetched from the backend so the verdict applies
/// to what is actually stored.
pub async fn scan_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ScanResponse>, AppError> {
    let requester = requester_id(&headers)?;
    let record = state.storage.find_record(file_id).await?;
    if record.owner_id != requester {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            format!("requester may not scan file {file_id}"),
        ));
    }

    let data = state.storage.fetch_bytes(&record).await?;
    let verdict = state.scanner.scan(file_id, &data).await?;
    Ok(Json(ScanResponse {
        clean: verdict.clean,
        threats: verdict.threats,
    }))
}
