use healthsnap_common::credentials::CredentialError;
use healthsnap_common::sigv4::SigningError;

/// Errors that can occur while publishing a document to an object store.
///
/// # Examples
///
/// ```rust
/// use healthsnap_storage::error::StorageError;
///
/// let err = StorageError::TargetMissing {
///     store: "s3",
///     bucket: "health-reports".to_string(),
/// };
/// assert!(err.to_string().contains("health-reports"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The destination bucket does not exist; nothing was written.
    #[error("Storage: {store} bucket {bucket} does not exist")]
    TargetMissing { store: &'static str, bucket: String },

    /// The store rejected the bucket check or the write.
    #[error("Storage: {store} publish failed: status={status}, body={body}")]
    PublishError {
        store: &'static str,
        status: u16,
        body: String,
    },

    /// Transport failure from `reqwest`, including timeouts.
    #[error("Storage: network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error(transparent)]
    SigningError(#[from] SigningError),

    #[error(transparent)]
    CredentialError(#[from] CredentialError),

    /// Store configuration is missing or invalid.
    #[error("Storage: configuration error: {0}")]
    ConfigError(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
