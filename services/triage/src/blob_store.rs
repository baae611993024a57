//! Blob store port and its in-memory implementation.

use crate::photo::BlobRef;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Where a client should write a new upload, and the ref to register once done
#[derive(Debug, Clone, Serialize)]
pub struct UploadTarget {
    pub blob_ref: BlobRef,
    pub upload_url: String,
    pub expires_at: DateTime<Utc>,
}

/// URL-addressable binary storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Reserve a ref and a writable URL for a client-side upload
    async fn generate_upload_target(&self) -> Result<UploadTarget>;

    /// Readable URL for a stored blob, or `None` if nothing is stored there
    async fn read_url(&self, blob_ref: &BlobRef) -> Result<Option<String>>;

    /// Store bytes and return their new ref
    async fn store(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef>;

    /// Remove a blob; deleting a missing blob succeeds
    async fn delete(&self, blob_ref: &BlobRef) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
}

/// Blob store kept in process memory, used for development and tests
pub struct MemoryBlobStore {
    base_url: String,
    upload_expiry: Duration,
    blobs: RwLock<HashMap<BlobRef, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            upload_expiry: Duration::from_secs(3600),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Write bytes under an existing ref, as a client upload would
    pub fn put(&self, blob_ref: &BlobRef, bytes: Vec<u8>, content_type: &str) {
        self.blobs.write().insert(
            blob_ref.clone(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn get(&self, blob_ref: &BlobRef) -> Option<Vec<u8>> {
        self.blobs.read().get(blob_ref).map(|b| b.bytes.clone())
    }

    pub fn content_type(&self, blob_ref: &BlobRef) -> Option<String> {
        self.blobs.read().get(blob_ref).map(|b| b.content_type.clone())
    }

    pub fn contains(&self, blob_ref: &BlobRef) -> bool {
        self.blobs.read().contains_key(blob_ref)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    fn url_for(&self, blob_ref: &BlobRef) -> String {
        format!("{}/{}", self.base_url, blob_ref)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn generate_upload_target(&self) -> Result<UploadTarget> {
        let blob_ref = BlobRef::new(format!("uploads/{}", Uuid::new_v4()));
        Ok(UploadTarget {
            upload_url: self.url_for(&blob_ref),
            blob_ref,
            expires_at: Utc::now() + chrono::Duration::from_std(self.upload_expiry)?,
        })
    }

    async fn read_url(&self, blob_ref: &BlobRef) -> Result<Option<String>> {
        Ok(self.contains(blob_ref).then(|| self.url_for(blob_ref)))
    }

    async fn store(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef> {
        let blob_ref = BlobRef::new(format!("stored/{}", Uuid::new_v4()));
        self.put(&blob_ref, bytes, content_type);
        Ok(blob_ref)
    }

    async fn delete(&self, blob_ref: &BlobRef) -> Result<()> {
        self.blobs.write().remove(blob_ref);
        Ok(())
    }
}

/// Map a file extension to its MIME type
pub fn content_type_for_extension(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

/// Map a MIME type to the extension used in object keys
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    match essence.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        _ => "bin",
    }
}
