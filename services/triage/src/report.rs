use crate::error::TriageError;
use crate::photo::PhotoId;
use serde::Serialize;
use std::fmt;

/// Which batch operation produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Cull,
    Enhance,
}

/// Why a candidate was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyRejected,
    AlreadyEnhanced,
    InFlight,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::AlreadyRejected => "already rejected",
            SkipReason::AlreadyEnhanced => "already enhanced",
            SkipReason::InFlight => "being processed by another operation",
        })
    }
}

/// Outcome of one item in a batch
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Success,
    Skipped(SkipReason),
    Failed(TriageError),
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub photo_id: PhotoId,
    pub outcome: ItemOutcome,
}

/// Per-item results of a best-effort batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub kind: BatchKind,
    /// Size of the catalog snapshot the batch started from
    pub catalog_size: usize,
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    pub fn new(kind: BatchKind, catalog_size: usize) -> Self {
        Self {
            kind,
            catalog_size,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, photo_id: PhotoId, outcome: ItemOutcome) {
        self.items.push(ItemReport { photo_id, outcome });
    }

    /// Aggregate count: photos rejected by a cull, or enhanced by an enhance
    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Success))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Skipped(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Failed(_)))
            .count()
    }

    pub fn succeeded_ids(&self) -> impl Iterator<Item = PhotoId> + '_ {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Success))
            .map(|i| i.photo_id)
    }

    pub fn failures(&self) -> impl Iterator<Item = (PhotoId, &TriageError)> + '_ {
        self.items.iter().filter_map(|i| match &i.outcome {
            ItemOutcome::Failed(error) => Some((i.photo_id, error)),
            _ => None,
        })
    }
}
