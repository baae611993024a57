use crate::config::EnhancementConfig;
use crate::error::EnhancementError;
use anyhow::Context;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;

/// Request body shared by every provider shape
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnhanceRequestBody<'a> {
    image_url: &'a str,
    enhancement_level: &'a str,
}

/// HTTP plumbing shared by the provider shapes
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    enhancement_level: String,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(config: &EnhancementConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create enhancement HTTP client")?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            enhancement_level: config.enhancement_level.clone(),
            timeout: config.request_timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn check_credentials(&self) -> Result<&str, EnhancementError> {
        self.api_key
            .as_deref()
            .ok_or_else(EnhancementError::missing_credentials)
    }

    /// POST the enhancement request; only 2xx responses come back
    pub async fn submit(&self, image_url: &str) -> Result<Response, EnhancementError> {
        let api_key = self.check_credentials()?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&EnhanceRequestBody {
                image_url,
                enhancement_level: &self.enhancement_level,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        ensure_success(response, "enhancement provider").await
    }

    /// GET a provider-hosted output file; only 2xx responses come back
    pub async fn download(&self, url: &str) -> Result<Response, EnhancementError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        ensure_success(response, "enhancement output download").await
    }

    /// Read the whole body, mapping transfer failures
    pub async fn body_bytes(&self, response: Response) -> Result<Vec<u8>, EnhancementError> {
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, error: reqwest::Error) -> EnhancementError {
        if error.is_timeout() {
            EnhancementError::timeout(self.timeout)
        } else if error.is_decode() {
            EnhancementError::malformed(error.to_string())
        } else {
            EnhancementError::network(error.to_string())
        }
    }
}

async fn ensure_success(response: Response, what: &str) -> Result<Response, EnhancementError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = response.text().await.unwrap_or_default();
    let detail = detail.trim();
    let cause = if detail.is_empty() {
        format!("{what} returned {status}")
    } else {
        format!("{what} returned {status}: {}", truncate(detail, 200))
    };

    Err(EnhancementError::http_status(status.as_u16(), cause))
}

/// Content type of a response, defaulting to opaque bytes
pub fn content_type_of(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnhancementFailureKind;

    #[test]
    fn test_blank_api_key_counts_as_missing() {
        let config = EnhancementConfig {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        let client = ProviderClient::new(&config).unwrap();

        let error = client.check_credentials().unwrap_err();
        assert_eq!(error.kind, EnhancementFailureKind::MissingCredentials);
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(EnhanceRequestBody {
            image_url: "https://blobs/a.jpg",
            enhancement_level: "high",
        })
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({ "imageUrl": "https://blobs/a.jpg", "enhancementLevel": "high" })
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 50), "short");
    }
}
