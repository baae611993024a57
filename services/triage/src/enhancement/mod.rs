//! Enhancement provider abstraction.
//!
//! Two provider integrations exist: one answers with the enhanced image
//! bytes directly ([`InlineBytesProvider`]), the other answers with a JSON
//! descriptor pointing at a temporary output URL ([`DescriptorProvider`]).
//! Both sit behind [`EnhancementProvider`] and fail with the same
//! [`EnhancementError`].

mod descriptor;
mod http;
mod inline_bytes;
mod scorer;

pub use descriptor::DescriptorProvider;
pub use http::ProviderClient;
pub use inline_bytes::InlineBytesProvider;
pub use scorer::QualityScorer;

use crate::config::{EnhancementConfig, ProviderShape};
use crate::error::EnhancementError;
use crate::photo::PhotoId;
use async_trait::async_trait;
use std::sync::Arc;

/// Image to enhance, addressed by a URL the provider can read
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancementRequest {
    pub photo_id: PhotoId,
    pub image_url: String,
}

/// Provider output, identical for every provider shape
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Score reported by the provider, if it reports one
    pub reported_score: Option<f64>,
}

/// Third-party image enhancement service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnhancementProvider: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Fails when the provider cannot be called at all, before any request
    fn check_credentials(&self) -> Result<(), EnhancementError>;

    /// Submit one image; never retried internally
    async fn enhance(&self, request: &EnhancementRequest) -> Result<EnhancedImage, EnhancementError>;
}

/// Build the provider selected by configuration
pub fn provider_from_config(
    config: &EnhancementConfig,
) -> anyhow::Result<Arc<dyn EnhancementProvider>> {
    let client = ProviderClient::new(config)?;

    let provider: Arc<dyn EnhancementProvider> = match config.provider {
        ProviderShape::InlineBytes => Arc::new(InlineBytesProvider::new(client)),
        ProviderShape::Descriptor => Arc::new(DescriptorProvider::new(client)),
    };

    Ok(provider)
}
