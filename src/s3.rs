//! S3-compatible [`BlobStore`].
//!
//! Talks to the S3 REST API directly with AWS Signature V4 authentication,
//! using path-style addressing (`<endpoint>/<bucket>/<key>`) so it works
//! against MinIO and LocalStack as well as AWS.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for signing.
//!
//! # Credentials
//!
//! Taken from `[blob]` (populated from `FOLIO_BLOB_ACCESS_KEY` /
//! `FOLIO_BLOB_SECRET_KEY`), falling back to `AWS_ACCESS_KEY_ID` /
//! `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::blob::{BlobError, BlobResult, BlobStore};
use crate::config::BlobConfig;

type HmacSha256 = Hmac<Sha256>;

const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Credentials used to sign every request.
#[derive(Clone)]
struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    fn resolve(config: &BlobConfig) -> Result<Self> {
        let access_key_id = match &config.access_key {
            Some(k) => k.clone(),
            None => std::env::var("AWS_ACCESS_KEY_ID")
                .context("blob access key not set (FOLIO_BLOB_ACCESS_KEY or AWS_ACCESS_KEY_ID)")?,
        };
        let secret_access_key = match &config.secret_key {
            Some(s) => s.clone(),
            None => std::env::var("AWS_SECRET_ACCESS_KEY").context(
                "blob secret key not set (FOLIO_BLOB_SECRET_KEY or AWS_SECRET_ACCESS_KEY)",
            )?,
        };
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Path-style S3 client implementing [`BlobStore`].
pub struct S3BlobStore {
    client: reqwest::Client,
    scheme: String,
    host: String,
    region: String,
    creds: Credentials,
}

impl S3BlobStore {
    pub fn new(config: &BlobConfig) -> Result<Self> {
        let creds = Credentials::resolve(config)?;
        let (scheme, host) = split_endpoint(config.endpoint_url.as_deref(), &config.region);
        Ok(Self {
            client: reqwest::Client::new(),
            scheme,
            host,
            region: config.region.clone(),
            creds,
        })
    }

    /// Sign and send one request. `canonical_uri` must already be URI-encoded.
    async fn send(
        &self,
        method: Method,
        canonical_uri: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> BlobResult<reqwest::Response> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut sorted_params = query.to_vec();
        sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = if body.is_empty() {
            EMPTY_PAYLOAD_SHA256.to_string()
        } else {
            hex_sha256(&body)
        };

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", self.scheme, self.host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ct) = content_type {
            req = req.header("content-type", ct);
        }
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        debug!(method = %method, uri = canonical_uri, "s3 request");

        req.send()
            .await
            .map_err(|e| BlobError::Unavailable(format!("{} {}: {}", method, canonical_uri, e)))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> BlobResult<()> {
        let body = tokio::fs::read(source).await?;
        let uri = object_uri(bucket, key);
        let resp = self
            .send(Method::PUT, &uri, &[], body, Some(content_type))
            .await?;
        expect_success(resp).await.map(|_| ())
    }

    async fn get(&self, bucket: &str, key: &str, dest: &Path) -> BlobResult<()> {
        let uri = object_uri(bucket, key);
        let resp = self.send(Method::GET, &uri, &[], Vec::new(), None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BlobError::NoSuchKey(key.to_string()));
        }
        let mut resp = expect_success(resp).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| BlobError::Unavailable(format!("reading s3://{}/{}: {}", bucket, key, e)))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> BlobResult<()> {
        let uri = object_uri(bucket, key);
        let resp = self
            .send(Method::DELETE, &uri, &[], Vec::new(), None)
            .await?;
        expect_success(resp).await.map(|_| ())
    }

    async fn bucket_exists(&self, bucket: &str) -> BlobResult<bool> {
        let uri = format!("/{}", uri_encode(bucket));
        let resp = self.send(Method::HEAD, &uri, &[], Vec::new(), None).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(BlobError::Rejected {
                status: s.as_u16(),
                message: format!("HEAD bucket {}", bucket),
            }),
        }
    }

    async fn make_bucket(&self, bucket: &str, region: &str) -> BlobResult<()> {
        let uri = format!("/{}", uri_encode(bucket));
        let body = create_bucket_body(region);
        let resp = self.send(Method::PUT, &uri, &[], body, None).await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT && is_already_exists(&text) {
            return Ok(());
        }
        Err(BlobError::Rejected {
            status: status.as_u16(),
            message: truncate(&text),
        })
    }

    async fn list_keys(&self, bucket: &str) -> BlobResult<Vec<String>> {
        let uri = format!("/{}", uri_encode(bucket));
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.send(Method::GET, &uri, &query, Vec::new(), None).await?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Err(BlobError::NoSuchBucket(bucket.to_string()));
            }
            let resp = expect_success(resp).await?;
            let xml = resp
                .text()
                .await
                .map_err(|e| BlobError::Unavailable(e.to_string()))?;

            let (batch, is_truncated, next_token) = parse_list_keys_response(&xml);
            keys.extend(batch);

            if is_truncated && next_token.is_some() {
                continuation_token = next_token;
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }
}

async fn expect_success(resp: reqwest::Response) -> BlobResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BlobError::Rejected {
        status: status.as_u16(),
        message: truncate(&body),
    })
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}

fn is_already_exists(body: &str) -> bool {
    body.contains("BucketAlreadyOwnedByYou") || body.contains("BucketAlreadyExists")
}

fn create_bucket_body(region: &str) -> Vec<u8> {
    // us-east-1 is the default location and must not be named explicitly.
    if region.is_empty() || region == "us-east-1" {
        return Vec::new();
    }
    format!(
        "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
         <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
        region
    )
    .into_bytes()
}

// ============ AWS SigV4 Helpers ============

/// Split a configured endpoint into `(scheme, host[:port])`.
///
/// Without an endpoint the regional AWS host is used over HTTPS.
fn split_endpoint(endpoint: Option<&str>, region: &str) -> (String, String) {
    match endpoint {
        Some(ep) => {
            let (scheme, rest) = if let Some(rest) = ep.strip_prefix("http://") {
                ("http", rest)
            } else if let Some(rest) = ep.strip_prefix("https://") {
                ("https", rest)
            } else {
                ("https", ep)
            };
            (scheme.to_string(), rest.trim_end_matches('/').to_string())
        }
        None => ("https".to_string(), format!("s3.{}.amazonaws.com", region)),
    }
}

fn object_uri(bucket: &str, key: &str) -> String {
    let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
    format!("/{}/{}", uri_encode(bucket), encoded_key)
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~` unescaped.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML Parsing ============

/// Keys, truncation flag, and continuation token from a `ListObjectsV2` body.
fn parse_list_keys_response(xml: &str) -> (Vec<String>, bool, Option<String>) {
    let mut keys = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(key) = extract_xml_value(block, "Key") {
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(unescape_xml(&key));
            }
        }
        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    (keys, is_truncated, next_token)
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
