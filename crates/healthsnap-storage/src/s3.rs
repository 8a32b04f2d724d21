use crate::error::{Result, StorageError};
use crate::{ObjectStore, CSV_CONTENT_TYPE};
use chrono::Utc;
use healthsnap_common::credentials::AwsCredentials;
use healthsnap_common::sigv4::{self, SigningRequest, EMPTY_PAYLOAD_SHA256};
use healthsnap_common::types::PublishTarget;
use reqwest::{Client, Method, StatusCode};

const STORE: &str = "s3";

/// Amazon S3 uploader.
///
/// Uses virtual-hosted style addressing against AWS and path-style addressing
/// when an endpoint override (LocalStack, MinIO) is configured.
pub struct S3Store {
    region: String,
    endpoint: Option<String>,
    credentials: AwsCredentials,
    client: Client,
}

impl S3Store {
    pub fn new(
        region: &str,
        endpoint: Option<String>,
        credentials: AwsCredentials,
        client: Client,
    ) -> Result<Self> {
        if region.trim().is_empty() {
            return Err(StorageError::ConfigError("s3 region must not be empty".to_string()));
        }
        Ok(Self {
            region: region.to_string(),
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            credentials,
            client,
        })
    }

    /// Base URL and path prefix addressing `bucket`.
    fn bucket_location(&self, bucket: &str) -> (String, String) {
        match &self.endpoint {
            Some(endpoint) => (endpoint.clone(), format!("/{}", sigv4::uri_encode(bucket))),
            None => (
                format!("https://{}.s3.{}.amazonaws.com", bucket, self.region),
                String::new(),
            ),
        }
    }

    async fn send_signed(
        &self,
        method: Method,
        bucket: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<reqwest::Response> {
        let (base, _) = self.bucket_location(bucket);
        let host = sigv4::host_header(&base)?;
        let payload_sha256 = match body {
            Some(body) => sigv4::sha256_hex(body.as_bytes()),
            None => EMPTY_PAYLOAD_SHA256.to_string(),
        };

        let mut headers: Vec<(&str, &str)> = vec![("x-amz-content-sha256", payload_sha256.as_str())];
        if body.is_some() {
            headers.push(("content-type", CSV_CONTENT_TYPE));
        }

        let request = SigningRequest {
            method: method.as_str(),
            host: &host,
            path,
            query: &[],
            headers: &headers,
            payload_sha256: &payload_sha256,
        };
        let signed = sigv4::sign(&self.credentials, &self.region, STORE, &request, Utc::now())?;

        let mut builder = self.client.request(method, format!("{base}{path}"));
        for (name, value) in headers.iter().copied() {
            builder = builder.header(name, value);
        }
        for (name, value) in &signed {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body.to_string());
        }

        Ok(builder.send().await?)
    }

    /// `HeadBucket`: `Ok(false)` when the bucket does not exist.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let (_, prefix) = self.bucket_location(bucket);
        let path = if prefix.is_empty() { "/".to_string() } else { prefix };
        let response = self.send_signed(Method::HEAD, bucket, &path, None).await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StorageError::PublishError {
                store: STORE,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &'static str {
        STORE
    }

    async fn publish(&self, target: &PublishTarget, content: &str) -> Result<()> {
        if !self.bucket_exists(&target.bucket).await? {
            return Err(StorageError::TargetMissing {
                store: STORE,
                bucket: target.bucket.clone(),
            });
        }

        let (_, prefix) = self.bucket_location(&target.bucket);
        let path = format!("{}/{}", prefix, sigv4::encode_path(&target.key));
        let response = self
            .send_signed(Method::PUT, &target.bucket, &path, Some(content))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::PublishError {
                store: STORE,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::info!(
            bucket = %target.bucket,
            key = %target.key,
            bytes = content.len(),
            "Published object to S3"
        );
        Ok(())
    }
}
