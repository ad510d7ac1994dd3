//! src/services/storage_service.rs
//!
//! StorageService — the storage gateway. The single entry point callers use
//! to upload, download, sign, and delete files across interchangeable
//! bucket-style backends, with SQLite as the durable metadata store.
//!
//! Failure-safety contract this module must never break:
//! - a FileRecord is created only after the backend `put` succeeded;
//! - a FileRecord is soft-deleted only after the backend `delete` succeeded.

use crate::config::AppConfig;
use crate::models::file_record::{FileRecord, ScanState};
use crate::providers::{
    AzureBlobProvider, GcsProvider, ProviderError, S3Provider, StorageProvider,
};
use crate::scanners::ScanError;
use crate::services::naming;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Fatal configuration problem. Surfaces at initialization and prevents
    /// the gateway from serving any request.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("file record `{0}` not found")]
    RecordNotFound(Uuid),

    #[error("object `{key}` not found in backend")]
    ObjectNotFound { key: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("upload buffer is empty")]
    EmptyUpload,

    #[error("backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    ScanFailed(#[from] ScanError),

    /// Refusal signal: the file carries a malware verdict and must not be
    /// served or trusted, regardless of its declared visibility.
    #[error("file is infected: {}", threats.join(", "))]
    Infected { threats: Vec<String> },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<ProviderError> for StorageError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound { key } => StorageError::ObjectNotFound { key },
            ProviderError::AccessDenied(msg) => StorageError::AccessDenied(msg),
            ProviderError::Backend(msg) => StorageError::Backend(msg),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

const RECORD_COLUMNS: &str = "id, original_name, storage_name, mime_type, size_bytes, category, \
     provider, bucket, storage_key, content_hash, owner_id, is_public, \
     scan_state, scanned, scanned_at, threats, is_active, deleted_at, created_at";

/// Resolve the configured provider adapter. This is the single enforcement
/// point for the no-local-disk invariant: downstream code may assume the
/// active provider is a durable bucket-style backend.
pub async fn build_provider(cfg: &AppConfig) -> StorageResult<Arc<dyn StorageProvider>> {
    match cfg.provider.to_ascii_lowercase().as_str() {
        "s3" | "minio" => {
            let provider = S3Provider::new(cfg)
                .await
                .map_err(|err| StorageError::Configuration(err.to_string()))?;
            Ok(Arc::new(provider))
        }
        "gcs" | "google" => {
            let provider =
                GcsProvider::new(cfg).map_err(|err| StorageError::Configuration(err.to_string()))?;
            Ok(Arc::new(provider))
        }
        "azure" => {
            let provider = AzureBlobProvider::new(cfg)
                .map_err(|err| StorageError::Configuration(err.to_string()))?;
            if let Err(err) = provider.ensure_container().await {
                warn!("could not verify Azure container at startup: {err}");
            }
            Ok(Arc::new(provider))
        }
        "local" | "disk" | "file" | "filesystem" => Err(StorageError::Configuration(format!(
            "provider `{}` selects disk-backed storage, which is not permitted; \
             every write must target a durable bucket-style backend (s3, gcs, azure)",
            cfg.provider
        ))),
        other => Err(StorageError::Configuration(format!(
            "unknown storage provider `{other}` (expected s3, gcs, or azure)"
        ))),
    }
}

/// StorageService provides the neutral storage operations:
/// - Upload a buffer (backend put, then FileRecord insert)
/// - Download (authorization check, then backend get)
/// - Signed URL (authorization check, then local signature computation)
/// - Delete (backend delete, then soft-delete of the record)
///
/// Configuration is injected at construction and never mutated in place;
/// concurrent callers share this service behind cheap clones.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    provider: Arc<dyn StorageProvider>,
    bucket: String,
}

impl StorageService {
    /// Load the active configuration and construct the gateway. Fails fast
    /// with a `Configuration` error when the selected provider is
    /// disk-backed or unknown.
    pub async fn initialize(cfg: &AppConfig, db: Arc<SqlitePool>) -> StorageResult<Self> {
        let provider = build_provider(cfg).await?;
        info!("storage gateway initialized with provider `{}`", provider.name());
        Ok(Self::new(db, provider, cfg.bucket.clone()))
    }

    /// Construct a gateway around an already-built provider. Test seams and
    /// embedders use this directly.
    pub fn new(db: Arc<SqlitePool>, provider: Arc<dyn StorageProvider>, bucket: String) -> Self {
        Self { db, provider, bucket }
    }

    /// Store a buffer and create its FileRecord.
    ///
    /// Order is part of the contract: classify, derive key, hash, backend
    /// put, and only then the record insert. A failed put leaves no record
    /// behind.
    pub async fn upload(
        &self,
        data: Bytes,
        original_name: &str,
        mime_type: &str,
        owner_id: &str,
        is_public: bool,
    ) -> StorageResult<FileRecord> {
        if data.is_empty() {
            return Err(StorageError::EmptyUpload);
        }

        let category = naming::classify(mime_type);
        let storage_key = naming::generate_storage_name(original_name, owner_id);
        let content_hash = naming::content_hash(&data);
        let size_bytes = data.len() as i64;

        self.provider
            .put(&storage_key, data, mime_type, is_public)
            .await?;

        let storage_name = storage_key
            .rsplit('/')
            .next()
            .unwrap_or(&storage_key)
            .to_string();

        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "INSERT INTO files (
                id, original_name, storage_name, mime_type, size_bytes, category,
                provider, bucket, storage_key, content_hash, owner_id, is_public,
                scan_state, scanned, scanned_at, threats, is_active, deleted_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'unscanned', 0, NULL, NULL, 1, NULL, ?)
            RETURNING {RECORD_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(original_name)
        .bind(&storage_name)
        .bind(mime_type)
        .bind(size_bytes)
        .bind(category)
        .bind(self.provider.name())
        .bind(&self.bucket)
        .bind(&storage_key)
        .bind(&content_hash)
        .bind(owner_id)
        .bind(is_public)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        info!(
            "stored `{}` as `{}` ({} bytes, {:?}) for owner {}",
            original_name, storage_key, size_bytes, category, owner_id
        );
        Ok(record)
    }

    /// Fetch an active (non-deleted) record by id.
    pub async fn find_record(&self, file_id: Uuid) -> StorageResult<FileRecord> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM files WHERE id = ? AND is_active = 1"
        ))
        .bind(file_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::RecordNotFound(file_id),
            other => StorageError::Database(other),
        })
    }

    /// Fetch the raw bytes for a record the requester may read.
    ///
    /// Allowed when the record is public or the requester is the uploader.
    /// Records with an infected verdict are never served. The stored
    /// storage key is used verbatim; it is never re-derived.
    pub async fn download(
        &self,
        file_id: Uuid,
        requester_id: &str,
    ) -> StorageResult<(FileRecord, Bytes)> {
        let record = self.find_record(file_id).await?;
        self.authorize_read(&record, requester_id)?;
        self.refuse_infected(&record)?;

        let data = self.provider.get(&record.storage_key).await?;
        Ok((record, data))
    }

    /// Fetch the stored bytes for an already-authorized record. The rescan
    /// path uses this; it must read even files carrying an infected verdict.
    pub async fn fetch_bytes(&self, record: &FileRecord) -> StorageResult<Bytes> {
        Ok(self.provider.get(&record.storage_key).await?)
    }

    /// Mint a time-bounded signed URL for a record the requester may read.
    /// Same authorization rule as `download`.
    pub async fn signed_url(
        &self,
        file_id: Uuid,
        requester_id: &str,
        ttl: Duration,
    ) -> StorageResult<String> {
        let record = self.find_record(file_id).await?;
        self.authorize_read(&record, requester_id)?;
        self.refuse_infected(&record)?;

        Ok(self.provider.sign(&record.storage_key, ttl).await?)
    }

    /// Conventional public URL for a public record, derived without a
    /// network call. `None` for private records: callers must go through
    /// `signed_url` for those.
    pub fn public_url(&self, record: &FileRecord) -> Option<String> {
        record
            .is_public
            .then(|| self.provider.public_url(&record.storage_key))
    }

    /// Delete the backend object, then soft-delete the record.
    ///
    /// Only the uploader may delete. If the backend delete fails the record
    /// stays fully active and visible; a half-completed delete must never
    /// hide a still-existing object from its owner.
    pub async fn delete(&self, file_id: Uuid, requester_id: &str) -> StorageResult<FileRecord> {
        let record = self.find_record(file_id).await?;
        if record.owner_id != requester_id {
            return Err(StorageError::AccessDenied(format!(
                "requester `{requester_id}` may not delete file {file_id}"
            )));
        }

        // Backend first. Its success gates the soft-delete write.
        self.provider.delete(&record.storage_key).await?;

        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "UPDATE files SET is_active = 0, deleted_at = ? WHERE id = ?
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(file_id)
        .fetch_one(&*self.db)
        .await?;

        info!("deleted `{}` for owner {}", record.storage_key, requester_id);
        Ok(record)
    }

    fn authorize_read(&self, record: &FileRecord, requester_id: &str) -> StorageResult<()> {
        if record.is_public || record.owner_id == requester_id {
            Ok(())
        } else {
            Err(StorageError::AccessDenied(format!(
                "requester `{requester_id}` may not read file {}",
                record.id
            )))
        }
    }

    fn refuse_infected(&self, record: &FileRecord) -> StorageResult<()> {
        if record.scan_state == ScanState::Infected {
            Err(StorageError::Infected {
                threats: record.threat_list(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file_record::FileCategory;
    use crate::services::test_support::{MemoryProvider, test_pool};

    async fn service_with(provider: MemoryProvider) -> (StorageService, Arc<MemoryProvider>) {
        let pool = test_pool().await;
        let provider = Arc::new(provider);
        let service = StorageService::new(pool, provider.clone(), "clinic-files".into());
        (service, provider)
    }

    async fn record_count(service: &StorageService) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&*service.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upload_creates_unscanned_record_after_put() {
        let (service, provider) = service_with(MemoryProvider::default()).await;

        let record = service
            .upload(Bytes::from_static(b"0123456789"), "scan.png", "image/png", "u1", false)
            .await
            .unwrap();

        assert_eq!(record.scan_state, ScanState::Unscanned);
        assert!(!record.scanned);
        assert!(!record.is_public);
        assert!(record.is_active);
        assert_eq!(record.size_bytes, 10);
        assert_eq!(record.category, FileCategory::Image);
        assert_eq!(record.owner_id, "u1");
        assert_eq!(record.provider, "memory");
        assert_eq!(record.content_hash, naming::content_hash(b"0123456789"));
        // The bytes landed under exactly the persisted key.
        assert_eq!(provider.stored_keys(), vec![record.storage_key.clone()]);
    }

    #[tokio::test]
    async fn owner_can_download_stranger_cannot() {
        let (service, _) = service_with(MemoryProvider::default()).await;
        let record = service
            .upload(Bytes::from_static(b"0123456789"), "scan.png", "image/png", "u1", false)
            .await
            .unwrap();

        let (_, data) = service.download(record.id, "u1").await.unwrap();
        assert_eq!(&data[..], b"0123456789");

        assert!(matches!(
            service.download(record.id, "u2").await,
            Err(StorageError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn public_records_are_readable_by_anyone() {
        let (service, _) = service_with(MemoryProvider::default()).await;
        let record = service
            .upload(Bytes::from_static(b"pix"), "avatar.jpg", "image/jpeg", "u1", true)
            .await
            .unwrap();

        let (_, data) = service.download(record.id, "anyone").await.unwrap();
        assert_eq!(&data[..], b"pix");
        assert!(service.public_url(&record).is_some());
    }

    #[tokio::test]
    async fn private_records_have_no_public_url() {
        let (service, _) = service_with(MemoryProvider::default()).await;
        let record = service
            .upload(Bytes::from_static(b"doc"), "report.pdf", "application/pdf", "u1", false)
            .await
            .unwrap();
        assert!(service.public_url(&record).is_none());
    }

    #[tokio::test]
    async fn failed_put_leaves_no_record_behind() {
        let (service, _) = service_with(MemoryProvider::failing_put()).await;

        let result = service
            .upload(Bytes::from_static(b"data"), "a.bin", "application/octet-stream", "u1", false)
            .await;

        assert!(matches!(result, Err(StorageError::Backend(_))));
        assert_eq!(record_count(&service).await, 0);
    }

    #[tokio::test]
    async fn failed_backend_delete_keeps_record_active() {
        let pool = test_pool().await;
        let good = Arc::new(MemoryProvider::default());
        let service = StorageService::new(pool.clone(), good, "clinic-files".into());
        let record = service
            .upload(Bytes::from_static(b"data"), "a.bin", "application/octet-stream", "u1", false)
            .await
            .unwrap();

        // Same metadata store, but a provider whose delete always fails.
        let failing = Arc::new(MemoryProvider::failing_delete());
        let broken = StorageService::new(pool, failing, "clinic-files".into());

        let result = broken.delete(record.id, "u1").await;
        assert!(matches!(result, Err(StorageError::Backend(_))));

        let after = broken.find_record(record.id).await.unwrap();
        assert!(after.is_active);
        assert!(after.deleted_at.is_none());
    }

    #[tokio::test]
    async fn delete_soft_deletes_after_backend_success() {
        let (service, provider) = service_with(MemoryProvider::default()).await;
        let record = service
            .upload(Bytes::from_static(b"data"), "a.bin", "application/octet-stream", "u1", false)
            .await
            .unwrap();

        let deleted = service.delete(record.id, "u1").await.unwrap();
        assert!(!deleted.is_active);
        assert!(deleted.deleted_at.is_some());
        assert!(provider.stored_keys().is_empty());

        // Soft-deleted records are absent to callers.
        assert!(matches!(
            service.download(record.id, "u1").await,
            Err(StorageError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn only_the_uploader_may_delete() {
        let (service, _) = service_with(MemoryProvider::default()).await;
        let record = service
            .upload(Bytes::from_static(b"data"), "a.bin", "application/octet-stream", "u1", false)
            .await
            .unwrap();

        assert!(matches!(
            service.delete(record.id, "u2").await,
            Err(StorageError::AccessDenied(_))
        ));
        assert!(service.find_record(record.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn storage_key_is_immutable_for_the_record_lifetime() {
        let (service, provider) = service_with(MemoryProvider::default()).await;
        let record = service
            .upload(Bytes::from_static(b"data"), "a.bin", "application/octet-stream", "u1", false)
            .await
            .unwrap();
        let original_key = record.storage_key.clone();

        // Mutate everything the lifecycle is allowed to mutate.
        sqlx::query("UPDATE files SET scan_state = 'clean', scanned = 1 WHERE id = ?")
            .bind(record.id)
            .execute(&*service.db)
            .await
            .unwrap();

        let after = service.find_record(record.id).await.unwrap();
        assert_eq!(after.storage_key, original_key);
        assert_eq!(provider.stored_keys(), vec![original_key]);
    }

    #[tokio::test]
    async fn signed_url_authorization_mirrors_download() {
        let (service, _) = service_with(MemoryProvider::default()).await;
        let record = service
            .upload(Bytes::from_static(b"data"), "a.bin", "application/octet-stream", "u1", false)
            .await
            .unwrap();
        let ttl = Duration::from_secs(900);

        let url = service.signed_url(record.id, "u1", ttl).await.unwrap();
        assert!(url.contains(&record.storage_key));
        assert!(url.contains("expires=900"));

        assert!(matches!(
            service.signed_url(record.id, "u2", ttl).await,
            Err(StorageError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn infected_records_are_never_served() {
        let (service, _) = service_with(MemoryProvider::default()).await;
        let record = service
            .upload(Bytes::from_static(b"evil"), "a.bin", "application/octet-stream", "u1", true)
            .await
            .unwrap();

        sqlx::query(
            "UPDATE files SET scan_state = 'infected', scanned = 1, threats = ? WHERE id = ?",
        )
        .bind(r#"["Eicar-Test-Signature"]"#)
        .bind(record.id)
        .execute(&*service.db)
        .await
        .unwrap();

        match service.download(record.id, "u1").await {
            Err(StorageError::Infected { threats }) => {
                assert_eq!(threats, vec!["Eicar-Test-Signature"]);
            }
            other => panic!("expected infected refusal, got {other:?}"),
        }
        assert!(matches!(
            service.signed_url(record.id, "anyone", Duration::from_secs(60)).await,
            Err(StorageError::Infected { .. })
        ));
    }

    #[tokio::test]
    async fn empty_uploads_are_rejected_before_the_backend() {
        let (service, provider) = service_with(MemoryProvider::default()).await;
        let result = service
            .upload(Bytes::new(), "a.bin", "application/octet-stream", "u1", false)
            .await;
        assert!(matches!(result, Err(StorageError::EmptyUpload)));
        assert!(provider.stored_keys().is_empty());
        assert_eq!(record_count(&service).await, 0);
    }

    #[tokio::test]
    async fn disk_backed_provider_selection_is_fatal() {
        let cfg = AppConfig {
            provider: "local".into(),
            ..AppConfig::default()
        };
        let result = build_provider(&cfg).await;
        match result {
            Err(StorageError::Configuration(msg)) => {
                assert!(msg.contains("not permitted"));
            }
            other => panic!("expected configuration error, got {:?}", other.map(|p| p.name())),
        }
    }

    #[tokio::test]
    async fn unknown_provider_selection_is_fatal() {
        let cfg = AppConfig {
            provider: "ftp".into(),
            ..AppConfig::default()
        };
        assert!(matches!(
            build_provider(&cfg).await,
            Err(StorageError::Configuration(_))
        ));
    }
}
