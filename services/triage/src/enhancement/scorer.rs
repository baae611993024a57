use crate::error::TriageError;
use crate::photo::QualityScore;
use rand::Rng;

/// Assigns the quality score recorded with a successful enhancement
///
/// Scores always land inside `[min, max]` and carry one decimal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScorer {
    min: f64,
    max: f64,
}

impl QualityScorer {
    pub fn new(min: f64, max: f64) -> Result<Self, TriageError> {
        let in_range = |v: f64| (QualityScore::MIN..=QualityScore::MAX).contains(&v);
        if !in_range(min) || !in_range(max) || min > max {
            return Err(TriageError::Configuration(format!(
                "invalid quality score band [{min}, {max}]"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Use the provider's score when it reported one, otherwise draw one
    pub fn score<R>(&self, reported: Option<f64>, rng: &mut R) -> QualityScore
    where
        R: Rng + ?Sized,
    {
        let raw = match reported.filter(|s| s.is_finite()) {
            Some(score) => score,
            None if self.min == self.max => self.min,
            None => rng.gen_range(self.min..=self.max),
        };
        QualityScore::clamped(((raw * 10.0).round() / 10.0).clamp(self.min, self.max))
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self {
            min: 7.5,
            max: 9.5,
        }
    }
}
