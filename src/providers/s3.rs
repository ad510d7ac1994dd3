//! S3-compatible provider built on the official AWS SDK.
//!
//! Works against AWS itself and any S3-compatible endpoint (MinIO, Ceph,
//! DigitalOcean Spaces) via the `endpoint` + path-style options.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use bytes::Bytes;
use std::time::Duration;

use super::{ProviderError, ProviderResult, StorageProvider, encode_key};
use crate::config::AppConfig;

pub struct S3Provider {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    cdn: Option<String>,
    path_style: bool,
}

impl S3Provider {
    pub async fn new(cfg: &AppConfig) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region = cfg.region.clone().unwrap_or_else(|| "us-east-1".into());
        loader = loader.region(Region::new(region.clone()));

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let (Some(access), Some(secret)) = (&cfg.access_key, &cfg.secret_key) {
            let creds = Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "file-gateway-static",
            );
            builder = builder.credentials_provider(creds);
        }

        if let Some(endpoint) = &cfg.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }

        if cfg.s3_use_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: cfg.bucket.clone(),
            region,
            endpoint: cfg.endpoint.clone(),
            cdn: cfg.cdn.clone(),
            path_style: cfg.s3_use_path_style,
        })
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        mime_type: &str,
        is_public: bool,
    ) -> ProviderResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(mime_type)
            .body(ByteStream::from(data.to_vec()));

        if is_public {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request
            .send()
            .await
            .map_err(|err| map_sdk_error("put", key, err))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> ProviderResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error("get", key, err))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|err| ProviderError::Backend(format!("get {key}: body read failed: {err}")))?;
        Ok(data.into_bytes())
    }

    async fn delete(&self, key: &str) -> ProviderResult<()> {
        // S3 DeleteObject reports success for absent keys, which matches the
        // idempotent contract directly.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error("delete", key, err))?;
        Ok(())
    }

    async fn sign(&self, key: &str, ttl: Duration) -> ProviderResult<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|err| ProviderError::Backend(format!("sign {key}: invalid ttl: {err}")))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| map_sdk_error("sign", key, err))?;

        Ok(request.uri().to_string())
    }

    fn public_url(&self, key: &str) -> String {
        let key = encode_key(key);
        if let Some(cdn) = &self.cdn {
            return format!("{}/{}", cdn.trim_end_matches('/'), key);
        }
        match &self.endpoint {
            Some(endpoint) if self.path_style => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
            }
            Some(endpoint) => {
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/');
                format!("https://{}.{}/{}", self.bucket, host, key)
            }
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

fn map_sdk_error<E, R>(op: &str, key: &str, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());

    match code.as_deref() {
        Some("NoSuchKey") | Some("NotFound") => ProviderError::NotFound {
            key: key.to_string(),
        },
        Some("AccessDenied") | Some("InvalidAccessKeyId") | Some("SignatureDoesNotMatch") => {
            ProviderError::AccessDenied(format!("{op} {key}: {message}"))
        }
        _ => ProviderError::Backend(format!("{op} {key}: {message}")),
    }
}

// Construction requires async config loading, so tests for URL shapes live on
// a hand-built instance.
#[cfg(test)]
mod tests {
    use super::*;

    fn provider(endpoint: Option<&str>, cdn: Option<&str>, path_style: bool) -> S3Provider {
        let conf = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-1"))
            .credentials_provider(Credentials::new("ak", "sk", None, None, "test"))
            .build();
        S3Provider {
            client: Client::from_conf(conf),
            bucket: "clinic-files".into(),
            region: "eu-west-1".into(),
            endpoint: endpoint.map(String::from),
            cdn: cdn.map(String::from),
            path_style,
        }
    }

    #[test]
    fn public_url_defaults_to_virtual_host_style() {
        let p = provider(None, None, false);
        assert_eq!(
            p.public_url("u1/a.png"),
            "https://clinic-files.s3.eu-west-1.amazonaws.com/u1/a.png"
        );
    }

    #[test]
    fn public_url_uses_path_style_endpoint() {
        let p = provider(Some("http://minio:9000"), None, true);
        assert_eq!(
            p.public_url("u1/a.png"),
            "http://minio:9000/clinic-files/u1/a.png"
        );
    }

    #[test]
    fn public_url_prefers_cdn() {
        let p = provider(None, Some("https://cdn.example.com/"), false);
        assert_eq!(p.public_url("u1/a.png"), "https://cdn.example.com/u1/a.png");
    }

    #[test]
    fn public_url_encodes_key_segments() {
        let p = provider(None, None, false);
        assert!(!p.public_url("u1/with space.png").contains(' '));
    }

    #[tokio::test]
    async fn sign_requires_no_network() {
        let p = provider(None, None, false);
        let url = p
            .sign("u1/a.png", Duration::from_secs(900))
            .await
            .expect("presigning is a local computation");
        assert!(url.contains("u1/a.png"));
        assert!(url.contains("X-Amz-Expires=900"));
    }
}
