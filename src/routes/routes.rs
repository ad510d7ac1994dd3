//! Defines routes for all file gateway operations.
//!
//! ## Structure
//! - **Health endpoints**
//!   - `GET    /healthz` — liveness
//!   - `GET    /readyz`  — readiness (SQLite + scan backend)
//!
//! - **File endpoints**
//!   - `POST   /files` — multipart upload (background scan)
//!   - `GET    /files/{id}` — metadata
//!   - `GET    /files/{id}/download` — fetch the bytes
//!   - `GET    /files/{id}/url` — mint a signed URL (supports ttl)
//!   - `DELETE /files/{id}` — backend delete + soft-delete
//!   - `POST   /files/{id}/scan` — rescan the stored bytes on demand
//!
//! Requester identity comes from the `x-user-id` header on every file route.

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file, file_url, get_file, scan_file, upload_file},
        health_handlers::{healthz, readyz},
    },
    services::{scan_service::ScanService, storage_service::StorageService},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Shared state carried by the router to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub scanner: ScanService,
}

/// Build and return the router for all gateway routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // file routes
        .route("/files", post(upload_file))
        .route("/files/{id}", get(get_file).delete(delete_file))
        .route("/files/{id}/download", get(download_file))
        .route("/files/{id}/url", get(file_url))
        .route("/files/{id}/scan", post(scan_file))
}
