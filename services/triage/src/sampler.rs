use crate::photo::Photo;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// Denominator for cull ratios, so the common ratios stay exact
const BASIS_POINTS: usize = 10_000;

/// Default share of the catalog rejected by one cull
pub const DEFAULT_CULL_RATIO: f64 = 0.3;

/// Picks which photos a cull rejects
///
/// The number of picks is `floor(ratio * total)`, where `total` counts every
/// photo in the snapshot, including ones that are already rejected. Picks
/// are drawn uniformly without replacement from the non-rejected photos and
/// capped at how many of those exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CullSampler {
    ratio_bp: usize,
}

impl CullSampler {
    /// `ratio` is clamped into [0, 1] and rounded to basis points
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            ratio_bp: (ratio * BASIS_POINTS as f64).round() as usize,
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio_bp as f64 / BASIS_POINTS as f64
    }

    /// Uncapped pick count for a snapshot of `total` photos
    pub fn target_count(&self, total: usize) -> usize {
        total * self.ratio_bp / BASIS_POINTS
    }

    pub fn select<'a, R>(&self, photos: &'a [Photo], rng: &mut R) -> Vec<&'a Photo>
    where
        R: Rng + ?Sized,
    {
        let eligible: Vec<&Photo> = photos.iter().filter(|p| !p.is_rejected()).collect();
        let count = self.target_count(photos.len()).min(eligible.len());

        debug!(
            total = photos.len(),
            eligible = eligible.len(),
            selected = count,
            "Sampled photos for culling"
        );

        eligible.choose_multiple(rng, count).copied().collect()
    }
}

impl Default for CullSampler {
    fn default() -> Self {
        Self::new(DEFAULT_CULL_RATIO)
    }
}
