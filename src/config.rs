use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; CLI wins.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    /// Backend provider family: `s3`, `gcs`, or `azure`. A disk-backed
    /// selection is rejected at gateway initialization.
    pub provider: String,
    /// Bucket (S3/GCS) or container (Azure) every object is written to.
    pub bucket: String,
    pub region: Option<String>,
    /// Custom backend endpoint (MinIO, emulators, private deployments).
    pub endpoint: Option<String>,
    /// CDN host prefix used for public URLs when set.
    pub cdn: Option<String>,
    /// Access key id (S3) or HMAC access id (GCS).
    pub access_key: Option<String>,
    /// Secret access key (S3) or HMAC secret (GCS).
    pub secret_key: Option<String>,
    pub azure_account: Option<String>,
    /// Base64 Azure account key.
    pub azure_access_key: Option<String>,
    /// Grant anonymous blob-level read on the Azure container. Off by
    /// default: container-wide anonymous read would expose private blobs.
    pub azure_public_access: bool,
    pub s3_use_path_style: bool,

    /// Malware scanner backend: `clamd`, `virustotal`, `metadefender`,
    /// or `off`.
    pub scanner: String,
    /// clamd endpoint: `tcp://host:port` or `unix:///path/to/clamd.sock`.
    pub clamd_addr: Option<String>,
    /// API key for the hosted scanner backends.
    pub scan_api_key: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object storage gateway with malware scanning")]
pub struct Args {
    /// Host to bind to (overrides FILE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Metadata database URL (overrides FILE_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage provider family (overrides FILE_GATEWAY_PROVIDER)
    #[arg(long)]
    pub provider: Option<String>,

    /// Bucket/container name (overrides FILE_GATEWAY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Scanner backend (overrides FILE_GATEWAY_SCANNER)
    #[arg(long)]
    pub scanner: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the
    /// migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_port = match env::var("FILE_GATEWAY_PORT") {
            Ok(value) => Some(
                value
                    .parse::<u16>()
                    .with_context(|| format!("parsing FILE_GATEWAY_PORT value `{}`", value))?,
            ),
            Err(env::VarError::NotPresent) => None,
            Err(err) => return Err(err).context("reading FILE_GATEWAY_PORT"),
        };

        let cfg = Self {
            host: args
                .host
                .or_else(|| env_opt("FILE_GATEWAY_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.or(env_port).unwrap_or(3000),
            database_url: args
                .database_url
                .or_else(|| env_opt("FILE_GATEWAY_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/file_gateway.db".into()),
            provider: args
                .provider
                .or_else(|| env_opt("FILE_GATEWAY_PROVIDER"))
                .unwrap_or_else(|| "s3".into()),
            bucket: args
                .bucket
                .or_else(|| env_opt("FILE_GATEWAY_BUCKET"))
                .unwrap_or_else(|| "clinic-files".into()),
            region: env_opt("FILE_GATEWAY_REGION"),
            endpoint: env_opt("FILE_GATEWAY_ENDPOINT"),
            cdn: env_opt("FILE_GATEWAY_CDN"),
            access_key: env_opt("FILE_GATEWAY_ACCESS_KEY"),
            secret_key: env_opt("FILE_GATEWAY_SECRET_KEY"),
            azure_account: env_opt("FILE_GATEWAY_AZURE_ACCOUNT"),
            azure_access_key: env_opt("FILE_GATEWAY_AZURE_ACCESS_KEY"),
            azure_public_access: env_opt("FILE_GATEWAY_AZURE_PUBLIC_ACCESS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            s3_use_path_style: env_opt("FILE_GATEWAY_S3_PATH_STYLE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            scanner: args
                .scanner
                .or_else(|| env_opt("FILE_GATEWAY_SCANNER"))
                .unwrap_or_else(|| "off".into()),
            clamd_addr: env_opt("FILE_GATEWAY_CLAMD_ADDR"),
            scan_api_key: env_opt("FILE_GATEWAY_SCAN_API_KEY"),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: "sqlite::memory:".into(),
            provider: "s3".into(),
            bucket: "clinic-files".into(),
            region: None,
            endpoint: None,
            cdn: None,
            access_key: None,
            secret_key: None,
            azure_account: None,
            azure_access_key: None,
            azure_public_access: false,
            s3_use_path_style: false,
            scanner: "off".into(),
            clamd_addr: None,
            scan_api_key: None,
        }
    }
}
