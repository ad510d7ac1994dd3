//! Backend provider adapters.
//!
//! Every physical backend (S3-compatible, GCS, Azure Blob) implements the
//! same five-operation [`StorageProvider`] contract. Call sites dispatch
//! polymorphically once at startup; no backend-specific branches leak into
//! the gateway.

pub mod azure;
pub mod gcs;
pub mod s3;

pub use azure::AzureBlobProvider;
pub use gcs::GcsProvider;
pub use s3::S3Provider;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The key does not exist in the backend. Distinct from `AccessDenied`
    /// so callers can redirect private-object reads to signed URLs instead
    /// of treating an ACL rejection as data loss.
    #[error("object `{key}` not found in backend")]
    NotFound { key: String },

    /// The backend rejected the credential/ACL combination.
    #[error("backend denied access: {0}")]
    AccessDenied(String),

    /// Transient or permanent backend I/O failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Neutral storage operations, identical across backend families.
///
/// Implementations hold a connection client created once at startup and
/// reused read-only across concurrent in-flight operations; no method
/// mutates adapter-level state.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Durably store `data` at `key` in the configured bucket/container.
    ///
    /// When `is_public`, the object must permit anonymous reads; otherwise
    /// it is stored with no public grant and can only be reached through
    /// [`StorageProvider::sign`].
    async fn put(&self, key: &str, data: Bytes, mime_type: &str, is_public: bool)
    -> ProviderResult<()>;

    /// Fetch the raw bytes stored at `key`.
    async fn get(&self, key: &str) -> ProviderResult<Bytes>;

    /// Remove the object at `key`.
    ///
    /// Idempotent in effect: an already-absent object still reports success.
    /// Genuine backend errors (auth failures, transport errors) propagate.
    async fn delete(&self, key: &str) -> ProviderResult<()>;

    /// Mint a time-bounded URL valid for `ttl`. Computed locally from the
    /// credential material; no network round-trip and no requirement that
    /// the bucket be public.
    async fn sign(&self, key: &str, ttl: Duration) -> ProviderResult<String>;

    /// Conventional public URL for this backend family, derived from the
    /// bucket/container name and key without a network call. Only
    /// meaningful for objects stored with `is_public = true`.
    fn public_url(&self, key: &str) -> String;

    /// Backend family name (`s3`, `gcs`, `azure`).
    fn name(&self) -> &'static str;
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client with hard deadlines. A hung backend surfaces as a send error
/// (mapped to `Backend`) instead of blocking the operation indefinitely.
pub(crate) fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
}

/// Map an HTTP status from a REST-backed provider onto the error contract.
pub(crate) fn classify_status(
    op: &str,
    key: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> ProviderError {
    match status.as_u16() {
        404 => ProviderError::NotFound {
            key: key.to_string(),
        },
        401 | 403 => ProviderError::AccessDenied(format!("{op} {key}: {status}")),
        _ => ProviderError::Backend(format!("{op} {key}: {status}: {body}")),
    }
}

/// Percent-encode a storage key for use in a URL path, keeping `/` intact.
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_client_builds_with_deadlines() {
        assert!(http_client().is_ok());
    }

    #[test]
    fn status_classification_keeps_denied_distinct_from_missing() {
        let denied = classify_status("get", "k", reqwest::StatusCode::FORBIDDEN, "");
        let missing = classify_status("get", "k", reqwest::StatusCode::NOT_FOUND, "");
        assert!(matches!(denied, ProviderError::AccessDenied(_)));
        assert!(matches!(missing, ProviderError::NotFound { .. }));
    }
}
