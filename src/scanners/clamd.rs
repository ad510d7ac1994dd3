//! Local ClamAV daemon (clamd) scanner, reachable over TCP or a Unix
//! domain socket.

use async_trait::async_trait;

use super::{MalwareScanner, ScanError, ScanOutcome};

/// How to reach the clamd daemon.
#[derive(Debug, Clone)]
pub enum ClamdEndpoint {
    Tcp { address: String },
    #[cfg(unix)]
    Socket { path: String },
}

#[derive(Debug, Clone)]
pub struct ClamdScanner {
    endpoint: ClamdEndpoint,
}

impl ClamdScanner {
    pub fn new(endpoint: ClamdEndpoint) -> Self {
        Self { endpoint }
    }

    /// Parse an endpoint spec: `tcp://host:port` or `unix:///path/to.sock`.
    /// A bare `host:port` is treated as TCP.
    pub fn from_spec(spec: &str) -> Result<Self, String> {
        if let Some(address) = spec.strip_prefix("tcp://") {
            return Ok(Self::new(ClamdEndpoint::Tcp {
                address: address.to_string(),
            }));
        }
        if let Some(path) = spec.strip_prefix("unix://") {
            #[cfg(unix)]
            return Ok(Self::new(ClamdEndpoint::Socket {
                path: path.to_string(),
            }));
            #[cfg(not(unix))]
            return Err(format!(
                "unix socket endpoint `{path}` is not supported on this platform"
            ));
        }
        if spec.contains(':') {
            return Ok(Self::new(ClamdEndpoint::Tcp {
                address: spec.to_string(),
            }));
        }
        Err(format!("unrecognized clamd endpoint `{spec}`"))
    }

    async fn raw_scan(&self, data: &[u8]) -> Result<Vec<u8>, ScanError> {
        use clamav_client::tokio::{Tcp, scan_buffer};
        #[cfg(unix)]
        use clamav_client::tokio::Socket;

        match &self.endpoint {
            ClamdEndpoint::Tcp { address } => {
                let clamd = Tcp {
                    host_address: address.as_str(),
                };
                scan_buffer(data, clamd, None)
                    .await
                    .map_err(|err| ScanError::Transport(format!("clamd scan failed: {err}")))
            }
            #[cfg(unix)]
            ClamdEndpoint::Socket { path } => {
                let clamd = Socket {
                    socket_path: path.as_str(),
                };
                scan_buffer(data, clamd, None)
                    .await
                    .map_err(|err| ScanError::Transport(format!("clamd scan failed: {err}")))
            }
        }
    }
}

#[async_trait]
impl MalwareScanner for ClamdScanner {
    async fn scan_bytes(&self, data: &[u8]) -> Result<ScanOutcome, ScanError> {
        let response = self.raw_scan(data).await?;

        match clamav_client::clean(&response) {
            Ok(true) => Ok(ScanOutcome::Clean),
            Ok(false) => {
                let raw = String::from_utf8_lossy(&response);
                Ok(ScanOutcome::Infected {
                    threats: vec![parse_threat(&raw)],
                })
            }
            Err(err) => Err(ScanError::Protocol(format!(
                "could not parse clamd response: {err}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "clamd"
    }

    async fn is_available(&self) -> bool {
        use clamav_client::PONG;
        use clamav_client::tokio::{Tcp, ping};
        #[cfg(unix)]
        use clamav_client::tokio::Socket;

        match &self.endpoint {
            ClamdEndpoint::Tcp { address } => {
                let clamd = Tcp {
                    host_address: address.as_str(),
                };
                matches!(ping(clamd).await, Ok(response) if response == PONG)
            }
            #[cfg(unix)]
            ClamdEndpoint::Socket { path } => {
                let clamd = Socket {
                    socket_path: path.as_str(),
                };
                matches!(ping(clamd).await, Ok(response) if response == PONG)
            }
        }
    }
}

/// Extract the threat name from a clamd detection line such as
/// `stream: Eicar-Test-Signature FOUND`.
fn parse_threat(raw: &str) -> String {
    let line = raw.trim().trim_end_matches('\0').trim();
    let line = line.strip_prefix("stream:").unwrap_or(line).trim();
    line.strip_suffix("FOUND").unwrap_or(line).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_threat_from_detection_line() {
        assert_eq!(
            parse_threat("stream: Eicar-Test-Signature FOUND\0"),
            "Eicar-Test-Signature"
        );
        assert_eq!(parse_threat("Win.Test.EICAR_HDB-1 FOUND"), "Win.Test.EICAR_HDB-1");
    }

    #[test]
    fn endpoint_spec_parsing() {
        assert!(matches!(
            ClamdScanner::from_spec("tcp://localhost:3310").unwrap().endpoint,
            ClamdEndpoint::Tcp { .. }
        ));
        assert!(matches!(
            ClamdScanner::from_spec("127.0.0.1:3310").unwrap().endpoint,
            ClamdEndpoint::Tcp { .. }
        ));
        assert!(ClamdScanner::from_spec("nonsense").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn endpoint_spec_parses_unix_socket() {
        assert!(matches!(
            ClamdScanner::from_spec("unix:///var/run/clamav/clamd.sock")
                .unwrap()
                .endpoint,
            ClamdEndpoint::Socket { .. }
        ));
    }

    #[tokio::test]
    async fn unreachable_daemon_is_a_scan_error_not_a_verdict() {
        let scanner = ClamdScanner::from_spec("tcp://127.0.0.1:1").unwrap();
        let result = scanner.scan_bytes(b"data").await;
        assert!(matches!(result, Err(ScanError::Transport(_))));
    }

    #[tokio::test]
    async fn unreachable_daemon_reports_unavailable() {
        let scanner = ClamdScanner::from_spec("tcp://127.0.0.1:1").unwrap();
        assert!(!scanner.is_available().await);
    }
}
