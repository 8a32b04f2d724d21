use healthsnap_common::credentials::CredentialError;
use healthsnap_common::sigv4::SigningError;

/// Errors that can occur when interacting with a cloud provider API.
///
/// # Examples
///
/// ```rust
/// use healthsnap_cloud::error::CloudError;
///
/// let err = CloudError::ConfigError("region must not be empty".to_string());
/// assert!(err.to_string().contains("region"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// HTTP-level error: non-2xx status code from the cloud API.
    #[error("{provider} API HTTP error: status={status}, body={body}")]
    HttpError {
        provider: String,
        status: u16,
        body: String,
    },

    /// The API rejected the request with a structured error payload.
    #[error("{provider} API error: code={code}, message={message}")]
    ApiResponseError {
        provider: String,
        code: String,
        message: String,
    },

    /// The response parsed but lacked a field the collector depends on.
    #[error("{provider} API returned a malformed response: {detail}")]
    MalformedResponse { provider: String, detail: String },

    /// An underlying HTTP transport error from `reqwest`, including timeouts.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// XML response could not be read.
    #[error("XML error: {0}")]
    XmlError(String),

    #[error(transparent)]
    SigningError(#[from] SigningError),

    #[error(transparent)]
    CredentialError(#[from] CredentialError),

    /// Provider configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Whole-lane collection failures. Per-cell metric fetch failures never
/// surface here; they degrade to `0.0` inside the collector.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("failed to resolve descriptor for metric {metric}: {source}")]
    DescriptorResolution {
        metric: String,
        #[source]
        source: CloudError,
    },

    #[error("failed to list instances: {0}")]
    Listing(#[source] CloudError),
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, CloudError>;
