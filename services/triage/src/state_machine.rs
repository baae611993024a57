//! Legal photo transitions.
//!
//! Status only ever moves `pending -> rejected`, and `is_enhanced` only ever
//! moves `false -> true`. Each transition validates its precondition and
//! returns the patch to persist; nothing here touches storage.

use crate::photo::{BlobRef, Photo, PhotoId, PhotoPatch, PhotoStatus, QualityScore};
use thiserror::Error;

/// A transition that the photo's current state does not allow
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("photo {0} is rejected and cannot be enhanced")]
    EnhanceRejected(PhotoId),

    #[error("photo {0} has no successful enhancement, so it cannot carry a quality score")]
    ScoreWithoutEnhancement(PhotoId),
}

/// Result of a transition that may be a no-op
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Apply(PhotoPatch),
    NoOp,
}

/// Successful provider work to record on a photo
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancementOutcome {
    pub enhanced_blob_ref: BlobRef,
    pub quality_score: QualityScore,
}

/// `pending -> rejected`; rejecting a rejected photo does nothing
pub fn reject(photo: &Photo) -> Transition {
    if photo.is_rejected() {
        return Transition::NoOp;
    }

    Transition::Apply(PhotoPatch {
        status: Some(PhotoStatus::Rejected),
        ..Default::default()
    })
}

/// Precondition shared by every enhancement attempt
pub fn ensure_enhanceable(photo: &Photo) -> Result<(), TransitionError> {
    if photo.is_rejected() {
        return Err(TransitionError::EnhanceRejected(photo.id));
    }
    Ok(())
}

/// Record a successful enhancement
pub fn enhance(photo: &Photo, outcome: EnhancementOutcome) -> Result<PhotoPatch, TransitionError> {
    ensure_enhanceable(photo)?;

    Ok(PhotoPatch {
        is_enhanced: Some(true),
        enhanced_blob_ref: Some(outcome.enhanced_blob_ref),
        quality_score: Some(outcome.quality_score),
        ..Default::default()
    })
}

/// Manually override the quality score of an enhanced photo
pub fn set_quality_score(photo: &Photo, score: QualityScore) -> Result<PhotoPatch, TransitionError> {
    if !photo.is_enhanced {
        return Err(TransitionError::ScoreWithoutEnhancement(photo.id));
    }

    Ok(PhotoPatch {
        quality_score: Some(score),
        ..Default::default()
    })
}
