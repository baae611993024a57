//! Batch triage and enhancement pipeline.
//!
//! Every item's outcome is persisted right after its own action, so a crash
//! mid-batch leaves earlier items updated and later ones untouched. Items
//! never share a transaction.

use crate::blob_store::{content_type_for_extension, BlobStore, UploadTarget};
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::enhancement::{EnhancementProvider, EnhancementRequest, QualityScorer};
use crate::error::{EnhancementError, TriageError};
use crate::photo::{BlobRef, NewPhoto, Photo, PhotoId, QualityScore};
use crate::report::{BatchKind, BatchReport, ItemOutcome, SkipReason};
use crate::sampler::CullSampler;
use crate::state_machine::{self, EnhancementOutcome, Transition};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Tunables of the pipeline
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub cull_ratio: f64,
    pub enhance_concurrency: usize,
    pub reenhance: bool,
    pub call_timeout: Duration,
    pub score_min: f64,
    pub score_max: f64,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cull_ratio: config.batch.cull_ratio,
            enhance_concurrency: config.batch.enhance_concurrency,
            reenhance: config.batch.reenhance,
            call_timeout: config.enhancement.request_timeout(),
            score_min: config.enhancement.score_min,
            score_max: config.enhancement.score_max,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A photo with a readable URL for its display blob
#[derive(Debug, Clone, Serialize)]
pub struct PhotoView {
    #[serde(flatten)]
    pub photo: Photo,
    pub url: Option<String>,
}

/// Drives cull and enhance over the catalog
pub struct BatchOrchestrator {
    catalog: Arc<dyn CatalogStore>,
    blobs: Arc<dyn BlobStore>,
    provider: Arc<dyn EnhancementProvider>,
    sampler: CullSampler,
    scorer: QualityScorer,
    enhance_concurrency: usize,
    reenhance: bool,
    call_timeout: Duration,
    rng: Mutex<Box<dyn RngCore + Send>>,
    /// Photos with an enhancement or delete in progress
    in_flight: Mutex<HashSet<PhotoId>>,
}

/// Releases a photo's in-flight claim when dropped
struct ProcessingGuard<'a> {
    in_flight: &'a Mutex<HashSet<PhotoId>>,
    id: PhotoId,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.id);
    }
}

impl BatchOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        blobs: Arc<dyn BlobStore>,
        provider: Arc<dyn EnhancementProvider>,
        settings: OrchestratorSettings,
    ) -> Result<Self, TriageError> {
        let scorer = QualityScorer::new(settings.score_min, settings.score_max)?;

        Ok(Self {
            catalog,
            blobs,
            provider,
            sampler: CullSampler::new(settings.cull_ratio),
            scorer,
            enhance_concurrency: settings.enhance_concurrency.max(1),
            reenhance: settings.reenhance,
            call_timeout: settings.call_timeout,
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Replace the random source used for culling and scoring
    pub fn with_rng<R>(self, rng: R) -> Self
    where
        R: RngCore + Send + 'static,
    {
        *self.rng.lock() = Box::new(rng);
        self
    }

    pub fn is_processing(&self, id: PhotoId) -> bool {
        self.in_flight.lock().contains(&id)
    }

    fn claim(&self, id: PhotoId) -> Result<ProcessingGuard<'_>, TriageError> {
        if !self.in_flight.lock().insert(id) {
            return Err(TriageError::Busy(id));
        }
        Ok(ProcessingGuard {
            in_flight: &self.in_flight,
            id,
        })
    }

    /// Reserve a blob ref and writable URL for a new upload
    pub async fn generate_upload_target(&self) -> Result<UploadTarget, TriageError> {
        self.blobs
            .generate_upload_target()
            .await
            .map_err(TriageError::persistence)
    }

    /// Create the catalog record for a finished upload
    #[instrument(skip(self, upload), fields(blob_ref = %upload.blob_ref))]
    pub async fn register_upload(&self, mut upload: NewPhoto) -> Result<Photo, TriageError> {
        if upload.filename.trim().is_empty() {
            return Err(TriageError::InvalidInput("filename must not be empty".to_string()));
        }
        if upload.content_type.trim().is_empty() {
            let extension = upload.filename.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
            upload.content_type = content_type_for_extension(extension).to_string();
        }

        let stored = self
            .blobs
            .read_url(&upload.blob_ref)
            .await
            .map_err(TriageError::persistence)?;
        if stored.is_none() {
            return Err(TriageError::blob_not_found(&upload.blob_ref));
        }

        let photo = Photo::from_upload(upload, Utc::now());
        self.catalog
            .insert(&photo)
            .await
            .map_err(TriageError::persistence)?;

        info!(photo_id = %photo.id, filename = %photo.filename, "Photo registered");
        Ok(photo)
    }

    pub async fn get_photo(&self, id: PhotoId) -> Result<Photo, TriageError> {
        self.catalog
            .get(id)
            .await
            .map_err(TriageError::persistence)?
            .ok_or_else(|| TriageError::photo_not_found(id))
    }

    /// Every photo, newest first, with a URL for what should be displayed
    pub async fn list_photos(&self) -> Result<Vec<PhotoView>, TriageError> {
        let photos = self
            .catalog
            .list_all()
            .await
            .map_err(TriageError::persistence)?;

        let mut views = Vec::with_capacity(photos.len());
        for photo in photos {
            let url = match self.blobs.read_url(photo.display_blob()).await {
                Ok(url) => url,
                Err(e) => {
                    warn!(photo_id = %photo.id, error = %e, "Failed to resolve photo URL");
                    None
                }
            };
            views.push(PhotoView { photo, url });
        }

        Ok(views)
    }

    /// Reject a random share of the catalog
    ///
    /// Persistence failures are recorded per item and do not stop the batch.
    #[instrument(skip(self))]
    pub async fn cull(&self) -> Result<BatchReport, TriageError> {
        let photos = self
            .catalog
            .list_all()
            .await
            .map_err(TriageError::persistence)?;

        let selected: Vec<Photo> = {
            let mut rng = self.rng.lock();
            self.sampler
                .select(&photos, &mut **rng)
                .into_iter()
                .cloned()
                .collect()
        };

        let mut report = BatchReport::new(BatchKind::Cull, photos.len());

        for photo in &selected {
            let outcome = self.reject_photo(photo).await;
            match &outcome {
                ItemOutcome::Success => {
                    debug!(photo_id = %photo.id, "Photo rejected");
                    metrics::counter!("triage.cull.rejected").increment(1);
                }
                ItemOutcome::Skipped(reason) => {
                    debug!(photo_id = %photo.id, reason = %reason, "Photo left unchanged");
                }
                ItemOutcome::Failed(error) => {
                    warn!(photo_id = %photo.id, error = %error, "Failed to reject photo; continuing");
                    metrics::counter!("triage.cull.failed").increment(1);
                }
            }
            report.push(photo.id, outcome);
        }

        info!(
            catalog_size = photos.len(),
            selected = selected.len(),
            rejected = report.succeeded(),
            failed = report.failed(),
            "Cull finished"
        );

        Ok(report)
    }

    async fn reject_photo(&self, photo: &Photo) -> ItemOutcome {
        let patch = match state_machine::reject(photo) {
            Transition::Apply(patch) => patch,
            Transition::NoOp => return ItemOutcome::Skipped(SkipReason::AlreadyRejected),
        };

        let Ok(_guard) = self.claim(photo.id) else {
            return ItemOutcome::Skipped(SkipReason::InFlight);
        };

        match self.catalog.patch(photo.id, &patch).await {
            Ok(Some(_)) => ItemOutcome::Success,
            Ok(None) => ItemOutcome::Failed(TriageError::photo_not_found(photo.id)),
            Err(e) => ItemOutcome::Failed(TriageError::persistence(e)),
        }
    }

    /// Enhance every photo that is not rejected, best effort
    ///
    /// Only a missing credential aborts the batch, before any provider call.
    /// Every other failure is recorded for its item and the batch moves on.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn enhance_all(&self) -> Result<BatchReport, TriageError> {
        self.provider.check_credentials()?;

        let photos = self
            .catalog
            .list_all()
            .await
            .map_err(TriageError::persistence)?;
        let catalog_size = photos.len();
        let candidates: Vec<Photo> = photos.into_iter().filter(|p| !p.is_rejected()).collect();

        info!(
            catalog_size,
            candidates = candidates.len(),
            concurrency = self.enhance_concurrency,
            "Enhancement batch started"
        );

        let outcomes: Vec<(PhotoId, ItemOutcome)> = stream::iter(candidates)
            .map(|photo| async move {
                let outcome = self.enhance_candidate(&photo).await;
                (photo.id, outcome)
            })
            .buffered(self.enhance_concurrency)
            .collect()
            .await;

        let mut report = BatchReport::new(BatchKind::Enhance, catalog_size);
        for (photo_id, outcome) in outcomes {
            report.push(photo_id, outcome);
        }

        info!(
            enhanced = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Enhancement batch finished"
        );

        Ok(report)
    }

    async fn enhance_candidate(&self, photo: &Photo) -> ItemOutcome {
        if photo.is_enhanced && !self.reenhance {
            debug!(photo_id = %photo.id, "Skipping already enhanced photo");
            metrics::counter!("triage.enhance.skipped").increment(1);
            return ItemOutcome::Skipped(SkipReason::AlreadyEnhanced);
        }

        match self.enhance_photo(photo).await {
            Ok(_) => ItemOutcome::Success,
            Err(TriageError::Busy(_)) => {
                debug!(photo_id = %photo.id, "Skipping photo claimed by another operation");
                metrics::counter!("triage.enhance.skipped").increment(1);
                ItemOutcome::Skipped(SkipReason::InFlight)
            }
            Err(error) => {
                warn!(
                    photo_id = %photo.id,
                    error = %error,
                    code = error.code(),
                    "Enhancement failed; continuing with next photo"
                );
                ItemOutcome::Failed(error)
            }
        }
    }

    /// Enhance exactly one photo; any failure is returned to the caller
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn enhance_one(&self, id: PhotoId) -> Result<Photo, TriageError> {
        self.provider.check_credentials()?;

        let photo = self.get_photo(id).await?;
        state_machine::ensure_enhanceable(&photo)?;

        self.enhance_photo(&photo).await
    }

    async fn enhance_photo(&self, photo: &Photo) -> Result<Photo, TriageError> {
        let _guard = self.claim(photo.id)?;
        state_machine::ensure_enhanceable(photo)?;

        let result = self.run_enhancement(photo).await;
        match &result {
            Ok(updated) => {
                metrics::counter!("triage.enhance.succeeded").increment(1);
                info!(
                    photo_id = %photo.id,
                    quality_score = updated.quality_score.map(|s| s.value()),
                    "Photo enhanced"
                );
            }
            Err(_) => {
                metrics::counter!("triage.enhance.failed").increment(1);
            }
        }
        result
    }

    async fn run_enhancement(&self, photo: &Photo) -> Result<Photo, TriageError> {
        let image_url = self
            .blobs
            .read_url(&photo.blob_ref)
            .await
            .map_err(TriageError::persistence)?
            .ok_or_else(|| TriageError::blob_not_found(&photo.blob_ref))?;

        let request = EnhancementRequest {
            photo_id: photo.id,
            image_url,
        };

        let started = Instant::now();
        let image = tokio::time::timeout(self.call_timeout, self.provider.enhance(&request))
            .await
            .map_err(|_| EnhancementError::timeout(self.call_timeout))??;
        metrics::histogram!("triage.enhance.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let enhanced_ref = self
            .blobs
            .store(image.bytes, &image.content_type)
            .await
            .map_err(TriageError::persistence)?;

        match self
            .record_enhancement(photo.id, &enhanced_ref, image.reported_score)
            .await
        {
            Ok((updated, superseded)) => {
                if let Some(previous) = superseded.filter(|p| *p != enhanced_ref) {
                    self.discard_blob(&previous).await;
                }
                Ok(updated)
            }
            Err(error) => {
                // Nothing references the new blob
                self.discard_blob(&enhanced_ref).await;
                Err(error)
            }
        }
    }

    /// Persist the enhancement against the latest record
    ///
    /// Returns the updated photo and the enhanced blob it replaced.
    async fn record_enhancement(
        &self,
        id: PhotoId,
        enhanced_ref: &BlobRef,
        reported_score: Option<f64>,
    ) -> Result<(Photo, Option<BlobRef>), TriageError> {
        // The record may have changed or vanished while the provider worked
        let current = self.get_photo(id).await?;

        let quality_score = {
            let mut rng = self.rng.lock();
            self.scorer.score(reported_score, &mut **rng)
        };

        let patch = state_machine::enhance(
            &current,
            EnhancementOutcome {
                enhanced_blob_ref: enhanced_ref.clone(),
                quality_score,
            },
        )?;

        let updated = self
            .catalog
            .patch_unless_rejected(id, &patch)
            .await
            .map_err(TriageError::persistence)?;

        match updated {
            Some(updated) => Ok((updated, current.enhanced_blob_ref)),
            // Rejected or deleted since the re-read
            None => {
                let latest = self.get_photo(id).await?;
                state_machine::ensure_enhanceable(&latest)?;
                Err(TriageError::photo_not_found(id))
            }
        }
    }

    async fn discard_blob(&self, blob_ref: &BlobRef) {
        if let Err(e) = self.blobs.delete(blob_ref).await {
            warn!(blob_ref = %blob_ref, error = %e, "Failed to delete orphaned blob");
        }
    }

    /// Remove a photo's record and every blob it references
    ///
    /// Blobs go first, so a failure leaves a record that can be deleted
    /// again rather than blobs nothing points to.
    #[instrument(skip(self))]
    pub async fn delete_photo(&self, id: PhotoId) -> Result<(), TriageError> {
        let _guard = self.claim(id)?;
        let photo = self.get_photo(id).await?;

        for blob_ref in photo.blob_refs() {
            self.blobs
                .delete(blob_ref)
                .await
                .map_err(TriageError::persistence)?;
        }

        let existed = self
            .catalog
            .delete(id)
            .await
            .map_err(TriageError::persistence)?;
        if !existed {
            return Err(TriageError::photo_not_found(id));
        }

        metrics::counter!("triage.photos.deleted").increment(1);
        info!(photo_id = %id, "Photo deleted");
        Ok(())
    }

    /// Override the quality score of an enhanced photo
    #[instrument(skip(self))]
    pub async fn set_quality_score(&self, id: PhotoId, score: f64) -> Result<Photo, TriageError> {
        let score =
            QualityScore::new(score).map_err(|e| TriageError::InvalidInput(e.to_string()))?;
        let photo = self.get_photo(id).await?;
        let patch = state_machine::set_quality_score(&photo, score)?;

        self.catalog
            .patch(id, &patch)
            .await
            .map_err(TriageError::persistence)?
            .ok_or_else(|| TriageError::photo_not_found(id))
    }
}
