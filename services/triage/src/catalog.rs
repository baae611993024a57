//! Photo catalog port and its in-memory implementation.

use crate::photo::{Photo, PhotoId, PhotoPatch};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Persistent store of photo records
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert a new record; fails if the id is already taken
    async fn insert(&self, photo: &Photo) -> Result<PhotoId>;

    /// Point read
    async fn get(&self, id: PhotoId) -> Result<Option<Photo>>;

    /// Every record, newest upload first
    async fn list_all(&self) -> Result<Vec<Photo>>;

    /// Apply a partial update and return the updated record, or `None` if
    /// the record does not exist
    async fn patch(&self, id: PhotoId, patch: &PhotoPatch) -> Result<Option<Photo>>;

    /// Like [`CatalogStore::patch`], but only while the record is not
    /// rejected; the status check and the write are one atomic step.
    /// Returns `None` when the record is missing or rejected.
    async fn patch_unless_rejected(&self, id: PhotoId, patch: &PhotoPatch)
        -> Result<Option<Photo>>;

    /// Remove a record; returns whether it existed
    async fn delete(&self, id: PhotoId) -> Result<bool>;
}

/// Catalog kept in process memory, used for development and tests
#[derive(Default)]
pub struct MemoryCatalog {
    photos: RwLock<HashMap<PhotoId, Photo>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.photos.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.read().is_empty()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn insert(&self, photo: &Photo) -> Result<PhotoId> {
        let mut photos = self.photos.write();
        if photos.contains_key(&photo.id) {
            bail!("photo {} already exists", photo.id);
        }
        photos.insert(photo.id, photo.clone());
        Ok(photo.id)
    }

    async fn get(&self, id: PhotoId) -> Result<Option<Photo>> {
        Ok(self.photos.read().get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Photo>> {
        let mut photos: Vec<Photo> = self.photos.read().values().cloned().collect();
        // Ties broken by id so listings are stable
        photos.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(photos)
    }

    async fn patch(&self, id: PhotoId, patch: &PhotoPatch) -> Result<Option<Photo>> {
        let mut photos = self.photos.write();
        Ok(photos.get_mut(&id).map(|photo| {
            photo.apply(patch);
            photo.clone()
        }))
    }

    async fn patch_unless_rejected(
        &self,
        id: PhotoId,
        patch: &PhotoPatch,
    ) -> Result<Option<Photo>> {
        let mut photos = self.photos.write();
        Ok(photos
            .get_mut(&id)
            .filter(|photo| !photo.is_rejected())
            .map(|photo| {
                photo.apply(patch);
                photo.clone()
            }))
    }

    async fn delete(&self, id: PhotoId) -> Result<bool> {
        Ok(self.photos.write().remove(&id).is_some())
    }
}
