//! Credential loading for both lanes.
//!
//! AWS keys come from a console-format CSV or the standard environment
//! variables. GCP bearer tokens come from a file, `GCP_ACCESS_TOKEN`, or the
//! Compute Engine metadata server.

use anyhow::{bail, Context};
use healthsnap_common::credentials::{AwsCredentials, CredentialError, StaticToken, TokenSource};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const METADATA_ENDPOINT: &str = "http://metadata.google.internal";
const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
/// Tokens are refreshed this long before the server-reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

pub fn load_aws_credentials(file: Option<&Path>) -> anyhow::Result<AwsCredentials> {
    match file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read AWS credentials {}", path.display()))?;
            parse_credentials_csv(&content)
                .with_context(|| format!("Invalid AWS credentials file {}", path.display()))
        }
        None => aws_credentials_from_env(|name| std::env::var(name).ok()),
    }
}

/// Parses the IAM console download: a header row naming `Access key ID` and
/// `Secret access key`, then one data row.
fn parse_credentials_csv(content: &str) -> anyhow::Result<AwsCredentials> {
    let content = content.trim_start_matches('\u{feff}');
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());

    let header: Vec<String> = lines
        .next()
        .context("credentials file is empty")?
        .split(',')
        .map(|h| h.trim().to_lowercase())
        .collect();
    let row: Vec<&str> = lines
        .next()
        .context("credentials file has no key row")?
        .split(',')
        .map(str::trim)
        .collect();

    let column = |name: &str| -> anyhow::Result<String> {
        let index = header
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("credentials header has no {name:?} column"))?;
        match row.get(index) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => bail!("credentials row has no value for {name:?}"),
        }
    };

    Ok(AwsCredentials::new(
        column("access key id")?,
        column("secret access key")?,
    ))
}

fn aws_credentials_from_env(
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<AwsCredentials> {
    let access_key_id = var("AWS_ACCESS_KEY_ID")
        .filter(|v| !v.is_empty())
        .context("AWS_ACCESS_KEY_ID is not set and no credentials_file is configured")?;
    let secret_access_key = var("AWS_SECRET_ACCESS_KEY")
        .filter(|v| !v.is_empty())
        .context("AWS_SECRET_ACCESS_KEY is not set")?;

    let credentials = AwsCredentials::new(access_key_id, secret_access_key);
    Ok(match var("AWS_SESSION_TOKEN").filter(|v| !v.is_empty()) {
        Some(token) => credentials.with_session_token(token),
        None => credentials,
    })
}

/// Picks the GCP token source: token file, then `GCP_ACCESS_TOKEN`, then the
/// metadata server.
pub fn gcp_token_source(
    token_file: Option<&Path>,
    metadata_endpoint: Option<String>,
    client: reqwest::Client,
) -> anyhow::Result<Arc<dyn TokenSource>> {
    if let Some(path) = token_file {
        let token = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read GCP access token {}", path.display()))?;
        tracing::info!(path = %path.display(), "Using GCP access token file");
        return Ok(Arc::new(StaticToken::new(token)));
    }

    if let Some(token) = std::env::var("GCP_ACCESS_TOKEN").ok().filter(|t| !t.trim().is_empty()) {
        tracing::info!("Using GCP access token from environment");
        return Ok(Arc::new(StaticToken::new(token)));
    }

    tracing::info!("Using GCP metadata server for access tokens");
    Ok(Arc::new(MetadataTokenSource::new(metadata_endpoint, client)))
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Service-account tokens from the Compute Engine metadata server, cached
/// until shortly before they expire.
pub struct MetadataTokenSource {
    url: String,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataTokenSource {
    pub fn new(endpoint: Option<String>, client: reqwest::Client) -> Self {
        let endpoint = endpoint.unwrap_or_else(|| METADATA_ENDPOINT.to_string());
        Self {
            url: format!("{}{}", endpoint.trim_end_matches('/'), METADATA_TOKEN_PATH),
            client,
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<MetadataToken, CredentialError> {
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| CredentialError::Unavailable(format!("metadata server: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Unavailable(format!(
                "metadata server returned status {status}"
            )));
        }

        response
            .json::<MetadataToken>()
            .await
            .map_err(|e| CredentialError::Invalid(format!("metadata token response: {e}")))
    }
}

#[async_trait::async_trait]
impl TokenSource for MetadataTokenSource {
    async fn token(&self) -> Result<String, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.refresh_at {
                return Ok(entry.token.clone());
            }
        }

        let fetched = self.fetch().await?;
        let lifetime = Duration::from_secs(fetched.expires_in).saturating_sub(EXPIRY_MARGIN);
        tracing::debug!(expires_in = fetched.expires_in, "Fetched GCP access token");

        *cached = Some(CachedToken {
            token: fetched.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(fetched.access_token)
    }
}
