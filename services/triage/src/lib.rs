//! Lightbox Triage Service
//!
//! Batch triage and enhancement for the Lightbox photo catalog. Photographers
//! upload into a catalog of `pending` photos; this service culls a random share
//! of them to `rejected` and sends the rest through an external enhancement
//! provider, storing the enhanced image and a quality score next to the
//! original.
//!
//! ## Features
//!
//! - **Random culling**: rejects `floor(ratio * catalog size)` photos chosen
//!   uniformly among those not yet rejected
//! - **Best-effort enhancement**: one failing photo never aborts the batch;
//!   every item is reported as succeeded, skipped or failed
//! - **Pluggable providers**: inline-bytes and JSON-descriptor response shapes
//!   behind one trait
//! - **Pluggable storage**: PostgreSQL or in-memory catalog, S3 or in-memory
//!   blob store
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API (axum)
//!        │
//!        ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │ BatchOrchestrator│─────▶│ Enhancement      │
//! │  CullSampler     │      │ provider (HTTP)  │
//! │  QualityScorer   │      └──────────────────┘
//! └──────────────────┘
//!     │          │
//!     ▼          ▼
//! ┌────────┐ ┌────────┐
//! │Catalog │ │ Blobs  │
//! │Postgres│ │  S3    │
//! └────────┘ └────────┘
//! ```

pub mod api;
pub mod blob_store;
pub mod catalog;
pub mod config;
pub mod enhancement;
pub mod error;
pub mod metadata_store;
pub mod orchestrator;
pub mod photo;
pub mod report;
pub mod s3_blob_store;
pub mod sampler;
pub mod state_machine;

pub use api::{create_router, start_api_server, AppState};
pub use blob_store::{BlobStore, MemoryBlobStore, UploadTarget};
pub use catalog::{CatalogStore, MemoryCatalog};
pub use config::Config;
pub use enhancement::{
    provider_from_config, EnhancedImage, EnhancementProvider, EnhancementRequest, QualityScorer,
};
pub use error::{EnhancementError, EnhancementFailureKind, TriageError};
pub use metadata_store::PostgresCatalog;
pub use orchestrator::{BatchOrchestrator, OrchestratorSettings, PhotoView};
pub use photo::{BlobRef, NewPhoto, Photo, PhotoId, PhotoPatch, PhotoStatus, QualityScore};
pub use report::{BatchKind, BatchReport, ItemOutcome, ItemReport, SkipReason};
pub use s3_blob_store::S3BlobStore;
pub use sampler::CullSampler;
