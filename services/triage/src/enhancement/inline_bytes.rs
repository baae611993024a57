use super::http::{content_type_of, ProviderClient};
use super::{EnhancedImage, EnhancementProvider, EnhancementRequest};
use crate::error::EnhancementError;
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Provider that answers with the enhanced image as the response body
pub struct InlineBytesProvider {
    client: ProviderClient,
}

impl InlineBytesProvider {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EnhancementProvider for InlineBytesProvider {
    fn name(&self) -> &'static str {
        "inline_bytes"
    }

    fn check_credentials(&self) -> Result<(), EnhancementError> {
        self.client.check_credentials().map(|_| ())
    }

    #[instrument(skip(self, request), fields(photo_id = %request.photo_id))]
    async fn enhance(&self, request: &EnhancementRequest) -> Result<EnhancedImage, EnhancementError> {
        let response = self.client.submit(&request.image_url).await?;
        let content_type = content_type_of(response.headers());
        let bytes = self.client.body_bytes(response).await?;

        if bytes.is_empty() {
            return Err(EnhancementError::malformed(
                "enhancement provider returned an empty body",
            ));
        }

        debug!(size_bytes = bytes.len(), content_type = %content_type, "Received enhanced image");

        Ok(EnhancedImage {
            bytes,
            content_type,
            reported_score: None,
        })
    }
}
