use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Catalog identifier of a photo, assigned once at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(pub Uuid);

impl PhotoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PhotoId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Opaque reference to a blob in the blob store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Triage status of a photo
///
/// There is no transition from `Rejected` back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    #[default]
    Pending,
    Rejected,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhotoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PhotoStatus::Pending),
            "rejected" => Ok(PhotoStatus::Rejected),
            other => Err(format!("unknown photo status: {other}")),
        }
    }
}

/// Quality score in the closed range [0, 10]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct QualityScore(f64);

impl QualityScore {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 10.0;

    pub fn new(value: f64) -> Result<Self, InvalidQualityScore> {
        if value.is_finite() && (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidQualityScore(value))
        }
    }

    /// Force a value into range; NaN becomes the minimum
    pub(crate) fn clamped(value: f64) -> Self {
        if value.is_nan() {
            Self(Self::MIN)
        } else {
            Self(value.clamp(Self::MIN, Self::MAX))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for QualityScore {
    type Error = InvalidQualityScore;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QualityScore> for f64 {
    fn from(score: QualityScore) -> Self {
        score.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("quality score {0} is outside [0, 10]")]
pub struct InvalidQualityScore(pub f64);

/// A photo record in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    /// Original upload
    pub blob_ref: BlobRef,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    pub status: PhotoStatus,
    pub is_enhanced: bool,
    /// Latest enhancement result, kept alongside the original
    pub enhanced_blob_ref: Option<BlobRef>,
    pub quality_score: Option<QualityScore>,
}

impl Photo {
    /// Build a fresh `pending` record from upload metadata
    pub fn from_upload(upload: NewPhoto, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            id: PhotoId::new(),
            blob_ref: upload.blob_ref,
            filename: upload.filename,
            content_type: upload.content_type,
            size_bytes: upload.size_bytes,
            uploaded_at,
            status: PhotoStatus::Pending,
            is_enhanced: false,
            enhanced_blob_ref: None,
            quality_score: None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.status == PhotoStatus::Rejected
    }

    /// Blob shown to users: the enhanced result if there is one
    pub fn display_blob(&self) -> &BlobRef {
        self.enhanced_blob_ref.as_ref().unwrap_or(&self.blob_ref)
    }

    /// Every blob this record keeps alive
    pub fn blob_refs(&self) -> impl Iterator<Item = &BlobRef> {
        std::iter::once(&self.blob_ref).chain(self.enhanced_blob_ref.iter())
    }

    pub fn apply(&mut self, patch: &PhotoPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(is_enhanced) = patch.is_enhanced {
            self.is_enhanced = is_enhanced;
        }
        if let Some(ref blob_ref) = patch.enhanced_blob_ref {
            self.enhanced_blob_ref = Some(blob_ref.clone());
        }
        if let Some(score) = patch.quality_score {
            self.quality_score = Some(score);
        }
    }
}

/// Upload metadata supplied when an upload completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPhoto {
    pub blob_ref: BlobRef,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Partial update of the mutable photo fields; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoPatch {
    pub status: Option<PhotoStatus>,
    pub is_enhanced: Option<bool>,
    pub enhanced_blob_ref: Option<BlobRef>,
    pub quality_score: Option<QualityScore>,
}

impl PhotoPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.is_enhanced.is_none()
            && self.enhanced_blob_ref.is_none()
            && self.quality_score.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> NewPhoto {
        NewPhoto {
            blob_ref: BlobRef::new("photos/original.jpg"),
            filename: "original.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            size_bytes: 2048,
        }
    }

    #[test]
    fn test_from_upload_defaults() {
        let photo = Photo::from_upload(upload(), Utc::now());

        assert_eq!(photo.status, PhotoStatus::Pending);
        assert!(!photo.is_enhanced);
        assert!(photo.enhanced_blob_ref.is_none());
        assert!(photo.quality_score.is_none());
        assert_eq!(photo.display_blob().as_str(), "photos/original.jpg");
    }

    #[test]
    fn test_apply_patch_only_touches_set_fields() {
        let mut photo = Photo::from_upload(upload(), Utc::now());
        let before = photo.clone();

        photo.apply(&PhotoPatch::default());
        assert_eq!(photo, before);

        photo.apply(&PhotoPatch {
            is_enhanced: Some(true),
            enhanced_blob_ref: Some(BlobRef::new("photos/enhanced.png")),
            quality_score: Some(QualityScore::new(8.4).unwrap()),
            ..Default::default()
        });

        assert_eq!(photo.status, PhotoStatus::Pending);
        assert!(photo.is_enhanced);
        assert_eq!(photo.display_blob().as_str(), "photos/enhanced.png");
        assert_eq!(photo.blob_refs().count(), 2);
    }

    #[test]
    fn test_quality_score_bounds() {
        assert!(QualityScore::new(0.0).is_ok());
        assert!(QualityScore::new(10.0).is_ok());
        assert!(QualityScore::new(-0.1).is_err());
        assert!(QualityScore::new(10.01).is_err());
        assert!(QualityScore::new(f64::NAN).is_err());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&PhotoStatus::Rejected).unwrap(),
            "\"rejected\""
        );
        assert_eq!("pending".parse::<PhotoStatus>(), Ok(PhotoStatus::Pending));
        assert!("archived".parse::<PhotoStatus>().is_err());
    }

    #[test]
    fn test_quality_score_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<QualityScore>("11.5").is_err());
        let score: QualityScore = serde_json::from_str("9.5").unwrap();
        assert_eq!(score.value(), 9.5);
    }
}
