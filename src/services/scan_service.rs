//! src/services/scan_service.rs
//!
//! ScanService — the asynchronous malware scan pipeline. Scanning happens
//! after upload and never blocks it; verdicts are written back to the
//! FileRecord once the configured backend answers.
//!
//! Verdict discipline: a scanner failure is an error state, never a clean
//! verdict. Only an explicit clean answer marks a file clean.

use crate::config::AppConfig;
use crate::models::file_record::{FileRecord, ScanState};
use crate::scanners::clamd::ClamdScanner;
use crate::scanners::metadefender::MetaDefenderScanner;
use crate::scanners::virustotal::VirusTotalScanner;
use crate::scanners::{MalwareScanner, ScanOutcome};
use crate::services::storage_service::{StorageError, StorageResult};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The verdict written back to a FileRecord after a scan attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanVerdict {
    pub clean: bool,
    pub status: ScanState,
    pub threats: Vec<String>,
}

impl ScanVerdict {
    fn clean() -> Self {
        Self {
            clean: true,
            status: ScanState::Clean,
            threats: Vec::new(),
        }
    }

    fn infected(threats: Vec<String>) -> Self {
        Self {
            clean: false,
            status: ScanState::Infected,
            threats,
        }
    }
}

/// ScanService owns the configured scanner backend (or none, when scanning
/// is disabled) and the verdict writes against the metadata store.
#[derive(Clone)]
pub struct ScanService {
    db: Arc<SqlitePool>,
    scanner: Option<Arc<dyn MalwareScanner>>,
}

impl ScanService {
    /// Resolve the configured scanner backend. `off` disables the pipeline;
    /// an unknown backend or a hosted backend without an API key is a fatal
    /// configuration error.
    pub fn initialize(cfg: &AppConfig, db: Arc<SqlitePool>) -> StorageResult<Self> {
        let scanner: Option<Arc<dyn MalwareScanner>> =
            match cfg.scanner.to_ascii_lowercase().as_str() {
                "off" | "none" | "disabled" => {
                    warn!("malware scanning is disabled; uploads will be marked clean unscanned");
                    None
                }
                "clamd" | "clamav" => {
                    let spec = cfg.clamd_addr.as_deref().unwrap_or("tcp://127.0.0.1:3310");
                    let scanner = ClamdScanner::from_spec(spec)
                        .map_err(|err| StorageError::Configuration(err.to_string()))?;
                    Some(Arc::new(scanner))
                }
                "virustotal" => {
                    let api_key = cfg.scan_api_key.as_deref().ok_or_else(|| {
                        StorageError::Configuration(
                            "the virustotal scanner requires FILE_GATEWAY_SCAN_API_KEY".into(),
                        )
                    })?;
                    let scanner = VirusTotalScanner::new(api_key)
                        .map_err(|err| StorageError::Configuration(err.to_string()))?;
                    Some(Arc::new(scanner))
                }
                "metadefender" => {
                    let api_key = cfg.scan_api_key.as_deref().ok_or_else(|| {
                        StorageError::Configuration(
                            "the metadefender scanner requires FILE_GATEWAY_SCAN_API_KEY".into(),
                        )
                    })?;
                    let scanner = MetaDefenderScanner::new(api_key)
                        .map_err(|err| StorageError::Configuration(err.to_string()))?;
                    Some(Arc::new(scanner))
                }
                other => {
                    return Err(StorageError::Configuration(format!(
                        "unknown scanner backend `{other}` \
                         (expected clamd, virustotal, metadefender, or off)"
                    )));
                }
            };

        if let Some(scanner) = &scanner {
            info!("scan pipeline initialized with backend `{}`", scanner.name());
        }
        Ok(Self { db, scanner })
    }

    /// Construct a pipeline around an already-built scanner. Test seams and
    /// embedders use this directly.
    pub fn new(db: Arc<SqlitePool>, scanner: Option<Arc<dyn MalwareScanner>>) -> Self {
        Self { db, scanner }
    }

    pub fn enabled(&self) -> bool {
        self.scanner.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.scanner.as_ref().map(|s| s.name()).unwrap_or("off")
    }

    pub async fn backend_available(&self) -> bool {
        match &self.scanner {
            Some(scanner) => scanner.is_available().await,
            None => true,
        }
    }

    /// Scan a buffer and record the verdict against its FileRecord.
    ///
    /// With scanning disabled the record is immediately marked clean and
    /// scanned. On a scanner failure the record is marked `error` with
    /// `scanned = false` and the failure is propagated; the file is never
    /// silently treated as clean.
    pub async fn scan(&self, file_id: Uuid, data: &[u8]) -> StorageResult<ScanVerdict> {
        let Some(scanner) = &self.scanner else {
            let verdict = ScanVerdict::clean();
            self.record_verdict(file_id, &verdict).await?;
            return Ok(verdict);
        };

        match scanner.scan_bytes(data).await {
            Ok(ScanOutcome::Clean) => {
                let verdict = ScanVerdict::clean();
                self.record_verdict(file_id, &verdict).await?;
                info!("file {file_id} scanned clean by {}", scanner.name());
                Ok(verdict)
            }
            Ok(ScanOutcome::Infected { threats }) => {
                let verdict = ScanVerdict::infected(threats);
                self.record_verdict(file_id, &verdict).await?;
                warn!(
                    "file {file_id} flagged by {}: {}",
                    scanner.name(),
                    verdict.threats.join(", ")
                );
                Ok(verdict)
            }
            Err(err) => {
                error!("scan of file {file_id} failed via {}: {err}", scanner.name());
                self.record_failure(file_id).await?;
                Err(StorageError::ScanFailed(err))
            }
        }
    }

    /// Scan in the background. Used by the upload path so the upload
    /// response never waits on a scanner.
    pub fn scan_detached(&self, record: &FileRecord, data: bytes::Bytes) {
        let service = self.clone();
        let file_id = record.id;
        tokio::spawn(async move {
            if let Err(err) = service.scan(file_id, &data).await {
                error!("background scan of file {file_id} failed: {err}");
            }
        });
    }

    async fn record_verdict(&self, file_id: Uuid, verdict: &ScanVerdict) -> StorageResult<()> {
        let threats = if verdict.threats.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&verdict.threats).map_err(|err| {
                StorageError::Backend(format!("serializing threat list: {err}"))
            })?)
        };

        let result = sqlx::query(
            "UPDATE files SET scan_state = ?, scanned = 1, scanned_at = ?, threats = ?
             WHERE id = ? AND is_active = 1",
        )
        .bind(verdict.status)
        .bind(Utc::now())
        .bind(threats)
        .bind(file_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RecordNotFound(file_id));
        }
        Ok(())
    }

    async fn record_failure(&self, file_id: Uuid) -> StorageResult<()> {
        // Each attempt overwrites prior scan detail; threat names from an
        // earlier verdict must not survive a failed attempt.
        let result = sqlx::query(
            "UPDATE files SET scan_state = 'error', scanned = 0, scanned_at = ?, threats = NULL
             WHERE id = ? AND is_active = 1",
        )
        .bind(Utc::now())
        .bind(file_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RecordNotFound(file_id));
        }
        Ok(())
    }
}
