//! Ollama vision backend
//!
//! `POST {base_url}/api/chat` with the image attached as base64 and
//! streaming disabled; `GET {base_url}/api/tags` doubles as the liveness
//! check and the installed-model listing.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::{general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::Deserialize;

use super::{DescriberError, VisionDescriber};
use crate::config::VisionConfig;

/// Upper bound for the `/api/tags` check, independent of the describe timeout
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OllamaDescriber {
    client: reqwest::Client,
    base_url: String,
    model: String,
    prompt: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaDescriber {
    /// Build a describer from the `[vision]` config section.
    ///
    /// `timeout` bounds each describe request.
    pub fn from_config(config: &VisionConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn list_models(&self) -> Result<Vec<String>, DescriberError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(LIVENESS_TIMEOUT.min(self.timeout))
            .send()
            .await?
            .error_for_status()?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| DescriberError::Parse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Chat request body with one base64-encoded image.
fn chat_request_body(model: &str, prompt: &str, image: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": prompt,
                "images": [BASE64_STANDARD.encode(image)],
            }
        ],
        "stream": false,
    })
}

/// Extract the description text, rejecting blank answers.
fn description_from_response(response: ChatResponse) -> Result<String, DescriberError> {
    let text = response.message.content.trim();
    if text.is_empty() {
        return Err(DescriberError::EmptyResponse);
    }
    Ok(text.to_string())
}

/// Installed tags carry a `:latest`-style suffix, so match by containment.
fn model_installed(installed: &[String], model: &str) -> bool {
    installed.iter().any(|name| name.contains(model))
}

#[async_trait]
impl VisionDescriber for OllamaDescriber {
    async fn describe(&self, image_path: &Path) -> Result<String, DescriberError> {
        let image = tokio::fs::read(image_path).await?;
        let body = chat_request_body(&self.model, &self.prompt, &image);

        tracing::debug!(
            model = %self.model,
            path = %image_path.display(),
            bytes = image.len(),
            "Requesting image description"
        );

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| match DescriberError::from(e) {
                DescriberError::Timeout(_) => DescriberError::Timeout(self.timeout),
                other => other,
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DescriberError::Request(format!("{status}: {detail}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DescriberError::Parse(e.to_string()))?;
        description_from_response(parsed)
    }

    async fn is_available(&self) -> bool {
        match self.list_models().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(base_url = %self.base_url, error = %e, "Ollama not available");
                false
            }
        }
    }

    async fn is_model_available(&self) -> bool {
        match self.list_models().await {
            Ok(installed) => model_installed(&installed, &self.model),
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "Could not list Ollama models");
                false
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "ollama"
    }
}
