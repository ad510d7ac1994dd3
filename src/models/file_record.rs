//! The durable metadata record describing one stored object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Coarse file category, derived purely from the MIME type at upload time.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Video,
    Document,
    Other,
}

/// Outcome of the most recent malware-scan attempt.
///
/// `Unscanned` is the state every record is created in. `Error` means the
/// scanner itself failed to produce a verdict; it is never conflated with
/// `Clean`.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Unscanned,
    Clean,
    Infected,
    Error,
}

/// Represents a single stored object across any backend provider.
///
/// The record stores its metadata, not the content bytes. The `storage_key`
/// is written once at creation and never changes; downloads and deletes must
/// use it verbatim rather than re-deriving it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Internal UUID assigned at creation.
    pub id: Uuid,

    /// Filename as supplied by the uploader.
    pub original_name: String,

    /// Generated, collision-resistant filename.
    pub storage_name: String,

    /// Content type (MIME type) declared at upload.
    pub mime_type: String,

    /// Size in bytes of the uploaded buffer.
    pub size_bytes: i64,

    /// Coarse category derived from the MIME type.
    pub category: FileCategory,

    /// Which provider family stored the object (s3, gcs, azure).
    pub provider: String,

    /// Bucket or container name the object lives in.
    pub bucket: String,

    /// Exact key used inside the bucket. Immutable once set.
    pub storage_key: String,

    /// SHA-256 digest over the raw bytes, hex-encoded.
    pub content_hash: String,

    /// Principal id of the uploader.
    pub owner_id: String,

    /// Whether the object may be served via a stable public URL.
    /// When false, access always goes through a time-bounded signed URL.
    pub is_public: bool,

    /// Verdict of the latest scan attempt.
    pub scan_state: ScanState,

    /// Whether a scanner actually produced a verdict for this record.
    pub scanned: bool,

    /// When the latest successful scan completed.
    pub scanned_at: Option<DateTime<Utc>>,

    /// JSON array of named threats, set when `scan_state` is `infected`.
    pub threats: Option<String>,

    /// Soft-delete flag. Records are never physically removed.
    pub is_active: bool,

    /// When the record was soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,

    /// When the record was created (after the backend put succeeded).
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Named threats from the latest scan, empty when clean or unscanned.
    pub fn threat_list(&self) -> Vec<String> {
        self.threats
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}
