//! Azure Blob Storage provider.
//!
//! Talks to the Blob REST API with Shared Key Lite request authorization and
//! mints service SAS tokens for time-bounded access. Both signatures are
//! HMAC-SHA256 over canonical strings, computed locally from the account key.
//!
//! Azure scopes anonymous access at the container, not per blob. The
//! container is created private; anonymous blob read is granted only when
//! explicitly configured, since a container-wide grant would expose private
//! blobs to anyone who learns a key. Without that grant, public URLs need a
//! CDN in front of the container.

use anyhow::Context;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use sha2::Sha256;
use std::time::Duration;

use super::{ProviderError, ProviderResult, StorageProvider, classify_status, encode_key};
use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2021-08-06";

pub struct AzureBlobProvider {
    http: reqwest::Client,
    account: String,
    key: Vec<u8>,
    container: String,
    endpoint: String,
    cdn: Option<String>,
    public_access: bool,
}

impl AzureBlobProvider {
    pub fn new(cfg: &AppConfig) -> anyhow::Result<Self> {
        let account = cfg
            .azure_account
            .clone()
            .context("Azure storage account must be configured for the azure provider")?;
        let raw_key = cfg
            .azure_access_key
            .clone()
            .context("Azure account key must be configured for the azure provider")?;
        let key = general_purpose::STANDARD
            .decode(raw_key.trim())
            .context("Azure account key is not valid base64")?;

        let endpoint = cfg
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{account}.blob.core.windows.net"))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: super::http_client().context("building Azure http client")?,
            account,
            key,
            container: cfg.bucket.clone(),
            endpoint,
            cdn: cfg.cdn.clone(),
            public_access: cfg.azure_public_access,
        })
    }

    /// Canonicalized `x-ms-*` headers for the create-container request.
    /// The anonymous-read grant is included only when explicitly configured.
    fn container_ms_headers(&self, date: &str) -> Vec<String> {
        let mut ms_headers = vec![
            format!("x-ms-date:{date}"),
            format!("x-ms-version:{API_VERSION}"),
        ];
        if self.public_access {
            ms_headers.insert(0, "x-ms-blob-public-access:blob".to_string());
        }
        ms_headers.sort();
        ms_headers
    }

    /// Create the container if it does not exist yet. Called once at
    /// startup. The container is private unless anonymous read was
    /// explicitly configured; private blobs stay reachable only through SAS.
    pub async fn ensure_container(&self) -> anyhow::Result<()> {
        let date = Self::http_date();
        let url = format!("{}/{}?restype=container", self.endpoint, self.container);
        let canonical_resource =
            format!("/{}/{}?restype=container", self.account, self.container);

        let ms_headers = self.container_ms_headers(&date);
        let auth = self.shared_key_lite("PUT", "", &ms_headers, &canonical_resource);

        let mut request = self
            .http
            .put(&url)
            .header(AUTHORIZATION, auth)
            .header(CONTENT_LENGTH, "0")
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION);
        if self.public_access {
            request = request.header("x-ms-blob-public-access", "blob");
        }

        let response = request.send().await.context("create container request")?;
        let status = response.status();
        // 409 means the container already exists.
        if status.is_success() || status.as_u16() == 409 {
            Ok(())
        } else {
            anyhow::bail!("create container {} failed: {status}", self.container)
        }
    }

    fn blob_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.container, encode_key(key))
    }

    fn canonical_resource(&self, key: &str) -> String {
        format!("/{}/{}/{}", self.account, self.container, key)
    }

    fn hmac_base64(&self, string_to_sign: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Shared Key Lite:
    /// `VERB\nContent-MD5\nContent-Type\nDate\nCanonicalizedHeaders\nCanonicalizedResource`
    /// with the date carried in `x-ms-date` and the Date line left empty.
    fn shared_key_lite(
        &self,
        verb: &str,
        content_type: &str,
        ms_headers: &[String],
        canonical_resource: &str,
    ) -> String {
        let canonical_headers = ms_headers.join("\n");
        let string_to_sign =
            format!("{verb}\n\n{content_type}\n\n{canonical_headers}\n{canonical_resource}");
        format!(
            "SharedKeyLite {}:{}",
            self.account,
            self.hmac_base64(&string_to_sign)
        )
    }

    fn http_date() -> String {
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    fn sas_time(t: DateTime<Utc>) -> String {
        t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// Build a read-only service SAS query string for one blob.
    fn sas_query(&self, key: &str, start: DateTime<Utc>, expiry: DateTime<Utc>) -> String {
        let st = Self::sas_time(start);
        let se = Self::sas_time(expiry);
        let canonical = format!("/blob/{}/{}/{}", self.account, self.container, key);

        // Field order is fixed by the 2020-12-06+ service SAS definition;
        // unused fields stay empty.
        let string_to_sign = [
            "r",        // signedPermissions
            &st,        // signedStart
            &se,        // signedExpiry
            &canonical, // canonicalizedResource
            "",         // signedIdentifier
            "",         // signedIP
            "https",    // signedProtocol
            API_VERSION,
            "b", // signedResource
            "",  // signedSnapshotTime
            "",  // signedEncryptionScope
            "",  // rscc
            "",  // rscd
            "",  // rsce
            "",  // rscl
            "",  // rsct
        ]
        .join("\n");

        let signature = self.hmac_base64(&string_to_sign);
        format!(
            "sv={}&st={}&se={}&sr=b&sp=r&spr=https&sig={}",
            API_VERSION,
            urlencoding::encode(&st),
            urlencoding::encode(&se),
            urlencoding::encode(&signature)
        )
    }

    async fn request(
        &self,
        op: &str,
        key: &str,
        builder: reqwest::RequestBuilder,
    ) -> ProviderResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|err| ProviderError::Backend(format!("{op} {key}: {err}")))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(op, key, status, &body))
        }
    }
}

#[async_trait]
impl StorageProvider for AzureBlobProvider {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        mime_type: &str,
        _is_public: bool,
    ) -> ProviderResult<()> {
        let date = Self::http_date();
        let mut ms_headers = vec![
            "x-ms-blob-type:BlockBlob".to_string(),
            format!("x-ms-date:{date}"),
            format!("x-ms-version:{API_VERSION}"),
        ];
        ms_headers.sort();
        let auth = self.shared_key_lite("PUT", mime_type, &ms_headers, &self.canonical_resource(key));

        let builder = self
            .http
            .put(self.blob_url(key))
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, mime_type)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .body(data.to_vec());

        self.request("put", key, builder).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> ProviderResult<Bytes> {
        let date = Self::http_date();
        let ms_headers = vec![format!("x-ms-date:{date}"), format!("x-ms-version:{API_VERSION}")];
        let auth = self.shared_key_lite("GET", "", &ms_headers, &self.canonical_resource(key));

        let builder = self
            .http
            .get(self.blob_url(key))
            .header(AUTHORIZATION, auth)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION);

        let response = self.request("get", key, builder).await?;
        response
            .bytes()
            .await
            .map_err(|err| ProviderError::Backend(format!("get {key}: body read: {err}")))
    }

    async fn delete(&self, key: &str) -> ProviderResult<()> {
        let date = Self::http_date();
        let ms_headers = vec![format!("x-ms-date:{date}"), format!("x-ms-version:{API_VERSION}")];
        let auth = self.shared_key_lite("DELETE", "", &ms_headers, &self.canonical_resource(key));

        let builder = self
            .http
            .delete(self.blob_url(key))
            .header(AUTHORIZATION, auth)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION);

        match self.request("delete", key, builder).await {
            Ok(_) => Ok(()),
            // Absent blobs report success; deletion is idempotent in effect.
            Err(ProviderError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn sign(&self, key: &str, ttl: Duration) -> ProviderResult<String> {
        let now = Utc::now();
        // Small clock-skew allowance so a just-minted URL is already valid.
        let start = now - chrono::Duration::minutes(5);
        let expiry = now
            + chrono::Duration::from_std(ttl)
                .map_err(|err| ProviderError::Backend(format!("sign {key}: invalid ttl: {err}")))?;

        Ok(format!(
            "{}?{}",
            self.blob_url(key),
            self.sas_query(key, start, expiry)
        ))
    }

    fn public_url(&self, key: &str) -> String {
        match &self.cdn {
            Some(cdn) => format!("{}/{}", cdn.trim_end_matches('/'), encode_key(key)),
            None => self.blob_url(key),
        }
    }

    fn name(&self) -> &'static str {
        "azure"
    }
}
