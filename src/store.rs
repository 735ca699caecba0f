use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::AppError;

// Room for every dataset blob
const DATASET_CAPACITY: u64 = 16;

/// Named blobs handed from the processing stage to the dashboard stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlobKey {
    /// Lead rows as uploaded.
    RawLeads,
    /// Scorer reply before cleaning.
    RawAiOutput,
    /// Cleaned `per_lead` reply.
    CleanedAiOutput,
    /// Leads after the merge, read by every dashboard query.
    MergedLeads,
    /// Metadata of the cycle that produced the other blobs.
    BatchMeta,
    /// Rendered email, per lead.
    LastGeneratedEmail(String),
}

impl BlobKey {
    /// Blobs rewritten by every scoring cycle.
    pub const DATASET: [BlobKey; 5] = [
        BlobKey::RawLeads,
        BlobKey::RawAiOutput,
        BlobKey::CleanedAiOutput,
        BlobKey::MergedLeads,
        BlobKey::BatchMeta,
    ];
}

/// Stored data with its SHA-256 checksum.
///
/// Checked on every read; a mismatch means the entry was corrupted or
/// tampered with and it is treated as absent.
#[derive(Debug, Clone)]
pub struct ValidatedCacheEntry {
    /// The stored data.
    pub data: String,
    /// SHA-256 checksum of the data (hex encoded).
    pub checksum: String,
}

impl ValidatedCacheEntry {
    pub fn new(data: String) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }
}

/// In-memory handoff store.
///
/// Dataset blobs and per-lead emails live in separate caches so that a long
/// email history can never evict the merged leads.
#[derive(Clone)]
pub struct HandoffStore {
    datasets: Cache<BlobKey, ValidatedCacheEntry>,
    emails: Cache<BlobKey, ValidatedCacheEntry>,
}

impl HandoffStore {
    /// # Arguments
    ///
    /// * `email_capacity` - Maximum number of remembered emails.
    pub fn new(email_capacity: u64) -> Self {
        Self {
            datasets: Cache::builder().max_capacity(DATASET_CAPACITY).build(),
            emails: Cache::builder().max_capacity(email_capacity.max(1)).build(),
        }
    }

    fn cache(&self, key: &BlobKey) -> &Cache<BlobKey, ValidatedCacheEntry> {
        match key {
            BlobKey::LastGeneratedEmail(_) => &self.emails,
            _ => &self.datasets,
        }
    }

    pub async fn write(&self, key: BlobKey, data: String) {
        tracing::debug!("Store write {:?} ({} bytes)", key, data.len());
        self.cache(&key)
            .insert(key, ValidatedCacheEntry::new(data))
            .await;
    }

    /// Returns the blob, or `None` when absent or failing validation.
    pub async fn read(&self, key: &BlobKey) -> Option<String> {
        let entry = self.cache(key).get(key).await?;
        if entry.is_valid() {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Store validation failed for {:?}: checksum mismatch. Expected: {}, Data length: {}",
                key,
                entry.checksum,
                entry.data.len()
            );
            self.cache(key).invalidate(key).await;
            None
        }
    }

    pub async fn remove(&self, key: &BlobKey) {
        self.cache(key).invalidate(key).await;
    }

    /// Drops every blob, emails included.
    pub async fn clear(&self) {
        for key in &BlobKey::DATASET {
            self.datasets.invalidate(key).await;
        }
        self.emails.invalidate_all();
        tracing::info!("Handoff store cleared");
    }

    pub async fn write_json<T: Serialize>(&self, key: BlobKey, value: &T) -> Result<(), AppError> {
        let data = serde_json::to_string(value)?;
        self.write(key, data).await;
        Ok(())
    }

    /// Typed read. A blob that no longer deserializes reads as absent.
    pub async fn read_json<T: DeserializeOwned>(&self, key: &BlobKey) -> Option<T> {
        let data = self.read(key).await?;
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Store blob {:?} is not valid JSON: {}", key, e);
                None
            }
        }
    }

    #[cfg(test)]
    async fn insert_entry(&self, key: BlobKey, entry: ValidatedCacheEntry) {
        self.cache(&key).insert(key, entry).await;
    }
}
