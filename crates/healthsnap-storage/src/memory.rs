use crate::error::{Result, StorageError};
use crate::ObjectStore;
use healthsnap_common::types::PublishTarget;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-process object store. Objects are replaced whole under a write lock,
/// so readers never observe a partially written document.
#[derive(Default)]
pub struct MemoryStore {
    buckets: HashSet<String>,
    objects: RwLock<HashMap<PublishTarget, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Store with the given buckets already created.
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            buckets: buckets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Current content at `target`, if any.
    pub async fn get(&self, target: &PublishTarget) -> Option<String> {
        self.objects.read().await.get(target).cloned()
    }

    /// Number of objects currently stored.
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Number of successful publishes since creation.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, target: &PublishTarget, content: &str) -> Result<()> {
        if !self.buckets.contains(&target.bucket) {
            return Err(StorageError::TargetMissing {
                store: "memory",
                bucket: target.bucket.clone(),
            });
        }

        self.objects
            .write()
            .await
            .insert(target.clone(), content.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
