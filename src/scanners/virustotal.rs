//! Hosted scanning via the VirusTotal v3 API.
//!
//! Flow: multipart-upload the buffer to `/files`, then poll the returned
//! analysis id until the verdict is complete.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{MalwareScanner, ScanError, ScanOutcome};

const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/api/v3";
const POLL_INTERVAL: Duration = Duration::from_secs(3);
const MAX_POLLS: u32 = 40;

pub struct VirusTotalScanner {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    data: UploadData,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    data: AnalysisData,
}

#[derive(Debug, Deserialize)]
struct AnalysisData {
    attributes: AnalysisAttributes,
}

#[derive(Debug, Deserialize)]
struct AnalysisAttributes {
    status: String,
    #[serde(default)]
    stats: AnalysisStats,
    #[serde(default)]
    results: BTreeMap<String, EngineResult>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisStats {
    #[serde(default)]
    malicious: u32,
    #[serde(default)]
    suspicious: u32,
}

#[derive(Debug, Deserialize)]
struct EngineResult {
    category: String,
    result: Option<String>,
}

impl VirusTotalScanner {
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
        let part = Part::bytes(data.to_vec()).file_name("upload.bin");
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/files", self.base_url))
            .header("x-apikey", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|err| ScanError::Unavailable(format!("virustotal upload: {err}")))?;

        if !response.status().is_success() {
            return Err(ScanError::Transport(format!(
                "virustotal upload rejected: {}",
                response.status()
            )));
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|err| ScanError::Protocol(format!("virustotal upload body: {err}")))?;
        Ok(upload.data.id)
    }

    async fn fetch_analysis(&self, id: &str) -> Result<AnalysisAttributes, ScanError> {
        let response = self
            .http
            .get(format!("{}/analyses/{id}", self.base_url))
            .header("x-apikey", &self.api_key)
            .send()
            .await
            .map_err(|err| ScanError::Unavailable(format!("virustotal poll: {err}")))?;

        if !response.status().is_success() {
            return Err(ScanError::Transport(format!(
                "virustotal poll rejected: {}",
                response.status()
            )));
        }

        let analysis: AnalysisResponse = response
            .json()
            .await
            .map_err(|err| ScanError::Protocol(format!("virustotal poll body: {err}")))?;
        Ok(analysis.data.attributes)
    }
}

/// Turn a completed analysis into a verdict.
fn verdict(attributes: &AnalysisAttributes) -> ScanOutcome {
    if attributes.stats.malicious == 0 && attributes.stats.suspicious == 0 {
        return ScanOutcome::Clean;
    }

    let mut threats: Vec<String> = attributes
        .results
        .iter()
        .filter(|(_, r)| r.category == "malicious" || r.category == "suspicious")
        .map(|(engine, r)| match &r.result {
            Some(name) => format!("{engine}:{name}"),
            None => engine.clone(),
        })
        .collect();
    if threats.is_empty() {
        // Stats flagged the file but no engine detail came back.
        threats.push("unnamed-threat".to_string());
    }
    ScanOutcome::Infected { threats }
}

#[async_trait]
impl MalwareScanner for VirusTotalScanner {
    async fn scan_bytes(&self, data: &[u8]) -> Result<ScanOutcome, ScanError> {
        let analysis_id = self.submit(data).await?;

        for _ in 0..MAX_POLLS {
            let attributes = self.fetch_analysis(&analysis_id).await?;
            if attributes.status == "completed" {
                return Ok(verdict(&attributes));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(ScanError::Protocol(format!(
            "analysis {analysis_id} did not complete within the polling budget"
        )))
    }

    fn name(&self) -> &'static str {
        "virustotal"
    }

    async fn is_available(&self) -> bool {
        self.http
            .get(format!("{}/analyses/self-check", self.base_url))
            .header("x-apikey", &self.api_key)
            .send()
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes(raw: &str) -> AnalysisAttributes {
        let response: AnalysisResponse = serde_json::from_str(raw).unwrap();
        response.data.attributes
    }

    #[test]
    fn clean_analysis_yields_clean() {
        let attrs = attributes(
            r#"{"data":{"attributes":{
                "status":"completed",
                "stats":{"malicious":0,"suspicious":0,"harmless":70},
                "results":{}
            }}}"#,
        );
        assert_eq!(verdict(&attrs), ScanOutcome::Clean);
    }

    #[test]
    fn malicious_analysis_names_threats() {
        let attrs = attributes(
            r#"{"data":{"attributes":{
                "status":"completed",
                "stats":{"malicious":2,"suspicious":0},
                "results":{
                    "EngineA":{"category":"malicious","result":"EICAR-Test-File"},
                    "EngineB":{"category":"malicious","result":null},
                    "EngineC":{"category":"undetected","result":null}
                }
            }}}"#,
        );
        match verdict(&attrs) {
            ScanOutcome::Infected { threats } => {
                assert_eq!(threats, vec!["EngineA:EICAR-Test-File", "EngineB"]);
            }
            other => panic!("expected infected, got {other:?}"),
        }
    }

    #[test]
    fn flagged_stats_without_detail_still_report_a_threat() {
        let attrs = attributes(
            r#"{"data":{"attributes":{
                "status":"completed",
                "stats":{"malicious":1,"suspicious":0},
                "results":{}
            }}}"#,
        );
        assert_eq!(
            verdict(&attrs),
            ScanOutcome::Infected {
                threats: vec!["unnamed-threat".to_string()]
            }
        );
    }
}
