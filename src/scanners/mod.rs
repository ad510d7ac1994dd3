//! Malware scanner backends.
//!
//! Every backend implements the same [`MalwareScanner`] contract: a scan
//! either produces a verdict (clean, or infected with named threats) or it
//! fails with a [`ScanError`]. An inability to scan is never expressed as a
//! verdict; conflating the two would let an outage launder infected files
//! as clean.

pub mod clamd;
pub mod metadefender;
pub mod virustotal;

pub use clamd::ClamdScanner;
pub use metadefender::MetaDefenderScanner;
pub use virustotal::VirusTotalScanner;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

// Hosted scans upload whole files, so the overall deadline is generous; the
// connect deadline is what catches a dead endpoint quickly.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client with hard deadlines. A hung scanner surfaces as a send error
/// (a [`ScanError`], never a verdict) instead of blocking the scan task
/// indefinitely.
pub(crate) fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
}

/// Verdict produced by a scanner backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Clean,
    /// One or more named threats were detected. The list is never empty.
    Infected { threats: Vec<String> },
}

#[derive(Debug, Error)]
pub enum ScanError {
    /// The scanner backend could not be reached.
    #[error("scanner unavailable: {0}")]
    Unavailable(String),

    /// The scanner was reached but the exchange failed mid-flight.
    #[error("scanner request failed: {0}")]
    Transport(String),

    /// The scanner responded with something the client cannot interpret,
    /// or never finished within the polling budget.
    #[error("unexpected scanner response: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait MalwareScanner: Send + Sync {
    /// Scan a raw buffer. `Err` means no verdict was produced.
    async fn scan_bytes(&self, data: &[u8]) -> Result<ScanOutcome, ScanError>;

    /// Name of the scanner implementation, for logs.
    fn name(&self) -> &'static str;

    /// Best-effort reachability probe.
    async fn is_available(&self) -> bool;
}
