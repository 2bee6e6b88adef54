//! Hosted text-to-image endpoint
//!
//! `POST <endpoint>` with `{"prompt": "..."}` and an optional bearer key;
//! the response body is the encoded image.

use std::time::Duration;

use async_trait::async_trait;

use super::{GeneratorError, ImageGenerator};
use crate::config::GeneratorConfig;

pub struct HttpImageGenerator {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    output_extension: String,
    timeout: Duration,
}

impl HttpImageGenerator {
    /// Build from the `[generator]` config section.
    ///
    /// An empty endpoint yields a generator that always reports
    /// `NotConfigured`; an empty key sends no `Authorization` header.
    pub fn from_config(config: &GeneratorConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: non_empty(&config.endpoint),
            api_key: non_empty(&config.api_key),
            output_extension: config.output_extension.clone(),
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GeneratorError> {
        let endpoint = self.endpoint.as_deref().ok_or(GeneratorError::NotConfigured)?;

        let mut request = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "prompt": prompt }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let timeout = self.timeout;
        let with_timeout = |e: reqwest::Error| match GeneratorError::from(e) {
            GeneratorError::Timeout(_) => GeneratorError::Timeout(timeout),
            other => other,
        };

        let response = request.send().await.map_err(with_timeout)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        let bytes = response.bytes().await.map_err(with_timeout)?;
        if bytes.is_empty() {
            return Err(GeneratorError::EmptyBody);
        }

        tracing::debug!(bytes = bytes.len(), "Generated image received");
        Ok(bytes.to_vec())
    }

    fn output_extension(&self) -> &str {
        &self.output_extension
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
