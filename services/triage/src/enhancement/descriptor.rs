use super::http::{content_type_of, ProviderClient};
use super::{EnhancedImage, EnhancementProvider, EnhancementRequest};
use crate::error::EnhancementError;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

/// JSON answer of descriptor-style providers
#[derive(Debug, Deserialize)]
struct Descriptor {
    output: OutputField,
    #[serde(default)]
    score: Option<f64>,
}

/// Some providers return a single URL, others a list of outputs
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OutputField {
    Single(String),
    Many(Vec<String>),
}

impl Descriptor {
    fn output_url(&self) -> Option<&str> {
        let url = match &self.output {
            OutputField::Single(url) => Some(url.as_str()),
            OutputField::Many(urls) => urls.first().map(String::as_str),
        }?;
        (url.starts_with("http://") || url.starts_with("https://")).then_some(url)
    }
}

/// Provider that answers with a descriptor whose output URL holds the result
pub struct DescriptorProvider {
    client: ProviderClient,
}

impl DescriptorProvider {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EnhancementProvider for DescriptorProvider {
    fn name(&self) -> &'static str {
        "descriptor"
    }

    fn check_credentials(&self) -> Result<(), EnhancementError> {
        self.client.check_credentials().map(|_| ())
    }

    #[instrument(skip(self, request), fields(photo_id = %request.photo_id))]
    async fn enhance(&self, request: &EnhancementRequest) -> Result<EnhancedImage, EnhancementError> {
        let response = self.client.submit(&request.image_url).await?;
        let body = self.client.body_bytes(response).await?;

        let descriptor: Descriptor = serde_json::from_slice(&body).map_err(|e| {
            EnhancementError::malformed(format!("unexpected descriptor body: {e}"))
        })?;
        let output_url = descriptor.output_url().ok_or_else(|| {
            EnhancementError::malformed("descriptor does not contain a usable output URL")
        })?;

        debug!(output_url = %output_url, "Fetching enhancement output");

        let download = self.client.download(output_url).await?;
        let content_type = content_type_of(download.headers());
        let bytes = self.client.body_bytes(download).await?;

        if bytes.is_empty() {
            return Err(EnhancementError::malformed("enhancement output is empty"));
        }

        Ok(EnhancedImage {
            bytes,
            content_type,
            reported_score: descriptor.score.filter(|s| s.is_finite()),
        })
    }
}
