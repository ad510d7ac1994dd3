//! Hosted scanning via the OPSWAT MetaDefender Cloud v4 API.
//!
//! Flow: upload the buffer to `/file`, then poll the returned `data_id`
//! until `progress_percentage` reaches 100.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{MalwareScanner, ScanError, ScanOutcome};

const DEFAULT_BASE_URL: &str = "https://api.metadefender.com/v4";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 60;

pub struct MetaDefenderScanner {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    data_id: String,
}

#[derive(Debug, Deserialize)]
struct ReportResponse {
    scan_results: ScanResults,
}

#[derive(Debug, Deserialize)]
struct ScanResults {
    progress_percentage: u32,
    #[serde(default)]
    total_detected_avs: u32,
    #[serde(default)]
    scan_details: BTreeMap<String, EngineDetail>,
}

#[derive(Debug, Deserialize)]
struct EngineDetail {
    #[serde(default)]
    threat_found: String,
}

impl MetaDefenderScanner {
    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: super::http_client()?,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn submit(&self, data: &[u8]) -> Result<String, ScanError> {
        let response = self
            .http
            .post(format!("{}/file", self.base_url))
            .header("apikey", &self.api_key)
            .header("content-type", "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|err| ScanError::Unavailable(format!("metadefender upload: {err}")))?;

        if !response.status().is_success() {
            return Err(ScanError::Transport(format!(
                "metadefender upload rejected: {}",
                response.status()
            )));
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|err| ScanError::Protocol(format!("metadefender upload body: {err}")))?;
        Ok(upload.data_id)
    }

    async fn fetch_report(&self, data_id: &str) -> Result<ScanResults, ScanError> {
        let response = self
            .http
            .get(format!("{}/file/{data_id}", self.base_url))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|err| ScanError::Unavailable(format!("metadefender poll: {err}")))?;

        if !response.status().is_success() {
            return Err(ScanError::Transport(format!(
                "metadefender poll rejected: {}",
                response.status()
            )));
        }

        let report: ReportResponse = response
            .json()
            .await
            .map_err(|err| ScanError::Protocol(format!("metadefender poll body: {err}")))?;
        Ok(report.scan_results)
    }
}

fn verdict(results: &ScanResults) -> ScanOutcome {
    if results.total_detected_avs == 0 {
        return ScanOutcome::Clean;
    }

    let mut threats: Vec<String> = results
        .scan_details
        .values()
        .map(|detail| detail.threat_found.trim())
        .filter(|threat| !threat.is_empty())
        .map(str::to_string)
        .collect();
    threats.sort();
    threats.dedup();
    if threats.is_empty() {
        threats.push("unnamed-threat".to_string());
    }
    ScanOutcome::Infected { threats }
}

#[async_trait]
impl MalwareScanner for MetaDefenderScanner {
    async fn scan_bytes(&self, data: &[u8]) -> Result<ScanOutcome, ScanError> {
        let data_id = self.submit(data).await?;

        for _ in 0..MAX_POLLS {
            let results = self.fetch_report(&data_id).await?;
            if results.progress_percentage >= 100 {
                return Ok(verdict(&results));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(ScanError::Protocol(format!(
            "scan {data_id} did not complete within the polling budget"
        )))
    }

    fn name(&self) -> &'static str {
        "metadefender"
    }

    async fn is_available(&self) -> bool {
        self.http
            .get(format!("{}/status", self.base_url))
            .header("apikey", &self.api_key)
            .send()
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(raw: &str) -> ScanResults {
        let response: ReportResponse = serde_json::from_str(raw).unwrap();
        response.scan_results
    }

    #[test]
    fn no_detections_is_clean() {
        let r = results(
            r#"{"scan_results":{"progress_percentage":100,"total_detected_avs":0,"scan_details":{}}}"#,
        );
        assert_eq!(verdict(&r), ScanOutcome::Clean);
    }

    #[test]
    fn detections_collect_named_threats() {
        let r = results(
            r#"{"scan_results":{
                "progress_percentage":100,
                "total_detected_avs":2,
                "scan_details":{
                    "Av1":{"threat_found":"Eicar-Test-Signature"},
                    "Av2":{"threat_found":"Eicar-Test-Signature"},
                    "Av3":{"threat_found":""}
                }
            }}"#,
        );
        assert_eq!(
            verdict(&r),
            ScanOutcome::Infected {
                threats: vec!["Eicar-Test-Signature".to_string()]
            }
        );
    }

    #[test]
    fn detection_without_names_still_reports_a_threat() {
        let r = results(
            r#"{"scan_results":{"progress_percentage":100,"total_detected_avs":1,"scan_details":{}}}"#,
        );
        assert_eq!(
            verdict(&r),
            ScanOutcome::Infected {
                threats: vec!["unnamed-threat".to_string()]
            }
        );
    }
}
