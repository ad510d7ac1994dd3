//! Google Cloud Storage provider.
//!
//! Talks to the GCS XML/interoperability API with HMAC-key authentication:
//! request signatures and signed URLs are HMAC-SHA1 over a canonical string,
//! so both are computed locally from the credential material without any
//! token-exchange round-trip.

use anyhow::Context;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, DATE};
use sha1::Sha1;
use std::time::Duration;

use super::{ProviderError, ProviderResult, StorageProvider, classify_status, encode_key};
use crate::config::AppConfig;

type HmacSha1 = Hmac<Sha1>;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const PUBLIC_READ_HEADER: &str = "x-goog-acl:public-read";

pub struct GcsProvider {
    http: reqwest::Client,
    access_id: String,
    secret: String,
    bucket: String,
    endpoint: String,
    cdn: Option<String>,
}

impl GcsProvider {
    pub fn new(cfg: &AppConfig) -> anyhow::Result<Self> {
        let access_id = cfg
            .access_key
            .clone()
            .context("GCS HMAC access id must be configured for the gcs provider")?;
        let secret = cfg
            .secret_key
            .clone()
            .context("GCS HMAC secret must be configured for the gcs provider")?;

        Ok(Self {
            http: super::http_client().context("building GCS http client")?,
            access_id,
            secret,
            bucket: cfg.bucket.clone(),
            endpoint: cfg
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.into())
                .trim_end_matches('/')
                .to_string(),
            cdn: cfg.cdn.clone(),
        })
    }

    fn resource_path(&self, key: &str) -> String {
        format!("/{}/{}", self.bucket, key)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, encode_key(key))
    }

    fn hmac_base64(&self, string_to_sign: &str) -> String {
        let mut mac =
            HmacSha1::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Canonical string for a header-authenticated request:
    /// `METHOD\nContent-MD5\nContent-Type\nDate\n[extension-headers]resource`.
    fn string_to_sign(
        method: &str,
        content_type: &str,
        date: &str,
        extension_headers: &[&str],
        resource: &str,
    ) -> String {
        let mut s = format!("{method}\n\n{content_type}\n{date}\n");
        for header in extension_headers {
            s.push_str(header);
            s.push('\n');
        }
        s.push_str(resource);
        s
    }

    fn authorization(
        &self,
        method: &str,
        content_type: &str,
        date: &str,
        extension_headers: &[&str],
        resource: &str,
    ) -> String {
        let signature = self.hmac_base64(&Self::string_to_sign(
            method,
            content_type,
            date,
            extension_headers,
            resource,
        ));
        format!("GOOG1 {}:{}", self.access_id, signature)
    }

    fn http_date() -> String {
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }
}

#[async_trait]
impl StorageProvider for GcsProvider {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        mime_type: &str,
        is_public: bool,
    ) -> ProviderResult<()> {
        let date = Self::http_date();
        let extension_headers: &[&str] = if is_public {
            &[PUBLIC_READ_HEADER]
        } else {
            &[]
        };
        let auth = self.authorization(
            "PUT",
            mime_type,
            &date,
            extension_headers,
            &self.resource_path(key),
        );

        let mut request = self
            .http
            .put(self.object_url(key))
            .header(DATE, &date)
            .header(CONTENT_TYPE, mime_type)
            .header(AUTHORIZATION, auth)
            .body(data.to_vec());
        if is_public {
            request = request.header("x-goog-acl", "public-read");
        }

        let response = request
            .send()
            .await
            .map_err(|err| ProviderError::Backend(format!("put {key}: {err}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(classify_status("put", key, status, &body))
        }
    }

    async fn get(&self, key: &str) -> ProviderResult<Bytes> {
        let date = Self::http_date();
        let auth = self.authorization("GET", "", &date, &[], &self.resource_path(key));

        let response = self
            .http
            .get(self.object_url(key))
            .header(DATE, &date)
            .header(AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|err| ProviderError::Backend(format!("get {key}: {err}")))?;

        if response.status().is_success() {
            response
                .bytes()
                .await
                .map_err(|err| ProviderError::Backend(format!("get {key}: body read: {err}")))
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(classify_status("get", key, status, &body))
        }
    }

    async fn delete(&self, key: &str) -> ProviderResult<()> {
        let date = Self::http_date();
        let auth = self.authorization("DELETE", "", &date, &[], &self.resource_path(key));

        let response = self
            .http
            .delete(self.object_url(key))
            .header(DATE, &date)
            .header(AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|err| ProviderError::Backend(format!("delete {key}: {err}")))?;

        let status = response.status();
        // Absent objects report success; the caller-visible contract is
        // idempotent deletion.
        if status.is_success() || status.as_u16() == 404 {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status("delete", key, status, &body))
        }
    }

    async fn sign(&self, key: &str, ttl: Duration) -> ProviderResult<String> {
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let string_to_sign = format!("GET\n\n\n{expires}\n{}", self.resource_path(key));
        let signature = self.hmac_base64(&string_to_sign);

        Ok(format!(
            "{}?GoogleAccessId={}&Expires={}&Signature={}",
            self.object_url(key),
            urlencoding::encode(&self.access_id),
            expires,
            urlencoding::encode(&signature)
        ))
    }

    fn public_url(&self, key: &str) -> String {
        match &self.cdn {
            Some(cdn) => format!("{}/{}", cdn.trim_end_matches('/'), encode_key(key)),
            None => self.object_url(key),
        }
    }

    fn name(&self) -> &'static str {
        "gcs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GcsProvider {
        GcsProvider {
            http: reqwest::Client::new(),
            access_id: "GOOG1EXAMPLE".into(),
            secret: "secret".into(),
            bucket: "clinic-files".into(),
            endpoint: DEFAULT_ENDPOINT.into(),
            cdn: None,
        }
    }

    #[test]
    fn string_to_sign_shape() {
        let s = GcsProvider::string_to_sign(
            "PUT",
            "image/png",
            "Mon, 01 Jan 2024 00:00:00 GMT",
            &[PUBLIC_READ_HEADER],
            "/clinic-files/u1/a.png",
        );
        assert_eq!(
            s,
            "PUT\n\nimage/png\nMon, 01 Jan 2024 00:00:00 GMT\nx-goog-acl:public-read\n/clinic-files/u1/a.png"
        );
    }

    #[tokio::test]
    async fn signed_url_is_time_bounded_and_local() {
        let p = provider();
        let url = p.sign("u1/a.png", Duration::from_secs(600)).await.unwrap();
        assert!(url.starts_with("https://storage.googleapis.com/clinic-files/u1/a.png?"));
        assert!(url.contains("GoogleAccessId=GOOG1EXAMPLE"));
        assert!(url.contains("Expires="));
        assert!(url.contains("Signature="));
    }

    #[test]
    fn public_url_shape() {
        let p = provider();
        assert_eq!(
            p.public_url("u1/a b.png"),
            "https://storage.googleapis.com/clinic-files/u1/a%20b.png"
        );
    }
}
