//! S3 document source.
//!
//! Lists and downloads bill PDFs from an S3 bucket using the S3 REST API
//! with AWS Signature V4 authentication, via pure-Rust signing (`hmac` +
//! `sha2`). Supports pagination for large buckets, glob filtering on object
//! keys, and custom endpoints for S3-compatible services (MinIO,
//! LocalStack).
//!
//! The object ETag doubles as the content-version token: S3 computes it
//! from the object bytes, so it changes exactly when the content does.
//!
//! Credentials come from the environment:
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and optionally
//! `AWS_SESSION_TOKEN`.

use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::S3SourceConfig;
use crate::error::{Error, Result};
use crate::models::DocumentRef;
use crate::source::DocumentSource;

type HmacSha256 = Hmac<Sha256>;

pub struct S3Source {
    config: S3SourceConfig,
    include_set: GlobSet,
    exclude_set: GlobSet,
    client: reqwest::Client,
}

impl S3Source {
    pub fn new(config: S3SourceConfig) -> Result<Self> {
        let include_set = build_globset(&config.include_globs)?;
        let exclude_set = build_globset(&config.exclude_globs)?;
        Ok(Self {
            config,
            include_set,
            exclude_set,
            client: reqwest::Client::new(),
        })
    }

    /// Key relative to the configured prefix, used for glob matching and as
    /// the document id.
    fn relative_key(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            return key.to_string();
        }
        let prefix = self.config.prefix.trim_end_matches('/');
        key.strip_prefix(prefix)
            .map(|s| s.trim_start_matches('/').to_string())
            .unwrap_or_else(|| key.to_string())
    }

    fn full_key(&self, document_id: &str) -> String {
        if self.config.prefix.is_empty() {
            return document_id.to_string();
        }
        format!(
            "{}/{}",
            self.config.prefix.trim_end_matches('/'),
            document_id
        )
    }

    /// Send a signed GET to the bucket host. `canonical_uri` must already
    /// be URI-encoded; `query_params` are sorted and encoded here.
    async fn signed_get(
        &self,
        creds: &AwsCredentials,
        canonical_uri: &str,
        query_params: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let host = s3_host(&self.config);

        let mut sorted_params = query_params.to_vec();
        sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = creds.session_token {
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
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        let url = if canonical_querystring.is_empty() {
            format!("https://{}{}", host, canonical_uri)
        } else {
            format!("https://{}{}?{}", host, canonical_uri, canonical_querystring)
        };

        let mut request = self
            .client
            .get(&url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = creds.session_token {
            request = request.header("x-amz-security-token", token);
        }

        request.send().await.map_err(|e| {
            Error::ServiceUnavailable(format!(
                "S3 request to s3://{} failed: {}",
                self.config.bucket, e
            ))
        })
    }

    /// List every object under the configured prefix, following
    /// `ListObjectsV2` continuation tokens.
    async fn list_objects(&self, creds: &AwsCredentials) -> Result<Vec<S3Object>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query_params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !self.config.prefix.is_empty() {
                query_params.push(("prefix".to_string(), self.config.prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                query_params.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.signed_get(creds, "/", &query_params).await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::ServiceUnavailable(format!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                )));
            }

            let xml = resp
                .text()
                .await
                .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml);
            objects.extend(batch);

            if is_truncated {
                continuation_token = next_token;
            } else {
                break;
            }
        }

        Ok(objects)
    }
}

#[async_trait]
impl DocumentSource for S3Source {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.config.bucket, self.config.prefix)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRef>> {
        let creds = AwsCredentials::from_env()?;
        let objects = self.list_objects(&creds).await?;

        let mut documents = Vec::new();
        for obj in objects {
            let rel_key = self.relative_key(&obj.key);
            if self.exclude_set.is_match(&rel_key) {
                continue;
            }
            if !self.include_set.is_match(&rel_key) {
                continue;
            }
            documents.push(DocumentRef {
                document_id: rel_key,
                content_version: obj.etag,
            });
        }

        documents.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        Ok(documents)
    }

    async fn get_content(&self, document_id: &str) -> Result<Vec<u8>> {
        let creds = AwsCredentials::from_env()?;
        let key = self.full_key(document_id);
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let canonical_uri = format!("/{}", encoded_key);

        let resp = self.signed_get(&creds, &canonical_uri, &[]).await?;
        if !resp.status().is_success() {
            return Err(Error::ServiceUnavailable(format!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ============ AWS credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::Config("AWS_ACCESS_KEY_ID environment variable not set".into()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            Error::Config("AWS_SECRET_ACCESS_KEY environment variable not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ SigV4 helpers ============

fn s3_host(config: &S3SourceConfig) -> String {
    if let Some(ref endpoint) = config.endpoint_url {
        endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    } else {
        format!("{}.s3.{}.amazonaws.com", config.bucket, config.region)
    }
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

/// kDate = HMAC("AWS4" + secret, date); kRegion = HMAC(kDate, region);
/// kService = HMAC(kRegion, service); kSigning = HMAC(kService, "aws4_request").
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986: everything except `A-Z a-z 0-9 - _ . ~`.
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

// ============ XML parsing (minimal, no extra deps) ============

struct S3Object {
    key: String,
    /// ETag with the surrounding quotes stripped.
    etag: String,
}

fn parse_list_objects_response(xml: &str) -> (Vec<S3Object>, bool, Option<String>) {
    let mut objects = Vec::new();
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
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        // Skip directory placeholder keys
        if key.is_empty() || key.ends_with('/') {
            continue;
        }

        let etag = extract_xml_value(block, "ETag")
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();

        objects.push(S3Object { key, etag });
    }

    (objects, is_truncated, next_token)
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)?;
    let value_start = start + open.len();
    let end = xml[value_start..].find(&close)?;
    Some(xml[value_start..value_start + end].to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| Error::Config(e.to_string()))?);
    }
    builder.build().map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_objects_response() {
        let xml = r#"<?xml version="1.0"?>
            <ListBucketResult>
              <IsTruncated>true</IsTruncated>
              <NextContinuationToken>tok-123</NextContinuationToken>
              <Contents>
                <Key>bills/acme-2024-03.pdf</Key>
                <ETag>"abc123"</ETag>
                <Size>1024</Size>
              </Contents>
              <Contents>
                <Key>bills/</Key>
                <ETag>"dir"</ETag>
              </Contents>
              <Contents>
                <Key>bills/acme-2024-04.pdf</Key>
                <ETag>"def456"</ETag>
              </Contents>
            </ListBucketResult>"#;

        let (objects, is_truncated, next_token) = parse_list_objects_response(xml);
        assert!(is_truncated);
        assert_eq!(next_token.as_deref(), Some("tok-123"));
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "bills/acme-2024-03.pdf");
        assert_eq!(objects[0].etag, "abc123");
        assert_eq!(objects[1].etag, "def456");
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("bills/acme 2024.pdf"), "bills%2Facme%202024.pdf");
        assert_eq!(uri_encode("a-b_c.d~e"), "a-b_c.d~e");
    }

    #[test]
    fn test_s3_host_prefers_custom_endpoint() {
        let config = S3SourceConfig {
            bucket: "bills".to_string(),
            prefix: String::new(),
            region: "us-east-1".to_string(),
            endpoint_url: Some("http://localhost:9000/".to_string()),
            include_globs: vec![],
            exclude_globs: vec![],
        };
        assert_eq!(s3_host(&config), "localhost:9000");

        let config = S3SourceConfig {
            endpoint_url: None,
            ..config
        };
        assert_eq!(s3_host(&config), "bills.s3.us-east-1.amazonaws.com");
    }
}
