//! Client for the local inference server (Ollama-compatible HTTP API).
//!
//! One blocking call per exchange with a fixed timeout; no retry, no
//! streaming, no queueing. Failures map onto `InferenceError` and surface to
//! clients as service-unavailable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::configuration::InferenceConfig;
use crate::error_handling::types::InferenceError;

/// Reply used when the server answers 200 but omits the text field, matching
/// the character's apologetic register rather than an opaque error.
const FALLBACK_REPLY: &str = "Sorry, I could not process your request.";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl InferenceClient {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Flat text prompt embedding the character name, exactly what the model
    /// was tuned against.
    pub fn build_prompt(character: &str, content: &str) -> String {
        format!("Character: {}\nUser: {}\nAssistant:", character, content)
    }

    pub async fn generate(&self, character: &str, content: &str) -> Result<String, InferenceError> {
        let prompt = Self::build_prompt(character, content);
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&GenerateRequest {
                model: &self.model,
                prompt: &prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Ollama answers 404 when the model is not pulled
            return Err(InferenceError::ModelMissing(self.model.clone()));
        }
        if !status.is_success() {
            return Err(InferenceError::BadStatus(status.as_u16()));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;
        Ok(body.response.unwrap_or_else(|| FALLBACK_REPLY.to_string()))
    }

    /// Names of the models the server has available.
    pub async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        if !response.status().is_success() {
            return Err(InferenceError::BadStatus(response.status().as_u16()));
        }
        let body: TagsResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;
        Ok(body.models.into_iter().map(|m| m.name).collect())
    }
}

fn map_send_error(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Unreachable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_shape() {
        assert_eq!(
            InferenceClient::build_prompt("Luna", "why is the moon round?"),
            "Character: Luna\nUser: why is the moon round?\nAssistant:"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_maps_to_unreachable() {
        let client = InferenceClient::new(&InferenceConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            model: "gemma:2b".to_string(),
            timeout_secs: 2,
        });
        assert!(matches!(
            client.generate("Luna", "hello").await,
            Err(InferenceError::Unreachable(_))
        ));
        assert!(matches!(
            client.list_models().await,
            Err(InferenceError::Unreachable(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = InferenceClient::new(&InferenceConfig {
            base_url: "http://localhost:11434/".to_string(),
            model: "gemma:2b".to_string(),
            timeout_secs: 2,
        });
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
