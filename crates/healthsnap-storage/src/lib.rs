//! Object-store uploaders that publish one CSV document per lane.
//!
//! Every [`ObjectStore`] replaces the object at a [`PublishTarget`] with a
//! single write, so a concurrent reader observes either the previous
//! document or the new one in full. [`s3::S3Store`] and [`gcs::GcsStore`]
//! talk to the real services; [`memory::MemoryStore`] keeps objects in
//! process.

pub mod error;
pub mod gcs;
pub mod memory;
pub mod s3;

#[cfg(test)]
mod tests;

use error::Result;
use healthsnap_common::types::PublishTarget;

/// MIME type attached to every published document.
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Destination for encoded snapshots.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because the orchestrator holds them for the life of the process.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short store name used in logs (`s3`, `gcs`, `memory`).
    fn name(&self) -> &'static str;

    /// Atomically replaces the object at `target` with `content`.
    ///
    /// # Errors
    ///
    /// [`error::StorageError::TargetMissing`] when the bucket does not
    /// exist, in which case nothing is written. Any other failure is a
    /// publish error and leaves the previous object untouched.
    async fn publish(&self, target: &PublishTarget, content: &str) -> Result<()>;
}

/// HTTP client shared by every call an uploader makes.
pub fn build_http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .build()?)
}
