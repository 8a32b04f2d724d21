use crate::error::{Result, StorageError};
use crate::{ObjectStore, CSV_CONTENT_TYPE};
use healthsnap_common::credentials::TokenSource;
use healthsnap_common::types::PublishTarget;
use reqwest::{Client, StatusCode};
use std::sync::Arc;

const STORE: &str = "gcs";
const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Google Cloud Storage uploader using the JSON API media upload.
pub struct GcsStore {
    endpoint: String,
    token_source: Arc<dyn TokenSource>,
    client: Client,
}

impl GcsStore {
    pub fn new(endpoint: Option<String>, token_source: Arc<dyn TokenSource>, client: Client) -> Self {
        Self {
            endpoint: endpoint
                .map(|e| e.trim_end_matches('/').to_string())
                .unwrap_or_else(|| GCS_ENDPOINT.to_string()),
            token_source,
            client,
        }
    }

    /// `buckets.get`: `Ok(false)` when the bucket does not exist.
    async fn bucket_exists(&self, bucket: &str, token: &str) -> Result<bool> {
        let url = format!("{}/storage/v1/b/{}", self.endpoint, urlencoding::encode(bucket));
        let response = self.client.get(&url).bearer_auth(token).send().await?;

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
impl ObjectStore for GcsStore {
    fn name(&self) -> &'static str {
        STORE
    }

    async fn publish(&self, target: &PublishTarget, content: &str) -> Result<()> {
        let token = self.token_source.token().await?;

        if !self.bucket_exists(&target.bucket, &token).await? {
            return Err(StorageError::TargetMissing {
                store: STORE,
                bucket: target.bucket.clone(),
            });
        }

        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint,
            urlencoding::encode(&target.bucket)
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .query(&[("uploadType", "media"), ("name", target.key.as_str())])
            .header(reqwest::header::CONTENT_TYPE, CSV_CONTENT_TYPE)
            .body(content.to_string())
            .send()
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
            "Published object to GCS"
        );
        Ok(())
    }
}
