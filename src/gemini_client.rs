use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ai_bridge::TextModel;
use crate::circuit_breaker::{create_ai_circuit_breaker, AiCircuitBreaker};
use crate::config::Config;
use crate::errors::AppError;

/// Client for the Generative Language `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    breaker: AiCircuitBreaker,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    /// Creates a new `GeminiClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://generativelanguage.googleapis.com`.
    /// * `api_key` - The API key, sent as the `key` query parameter.
    /// * `model` - Model name, e.g. `gemini-1.5-flash`.
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Gemini client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            breaker: create_ai_circuit_breaker(),
        })
    }

    /// Builds a client when an API key is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>, AppError> {
        config
            .gemini_api_key
            .as_ref()
            .map(|key| {
                Self::new(
                    config.gemini_base_url.clone(),
                    key.clone(),
                    config.gemini_model.clone(),
                )
            })
            .transpose()
    }

    /// Sends one prompt and returns the concatenated text of the first
    /// candidate.
    ///
    /// # Arguments
    ///
    /// * `prompt` - The full prompt text.
    ///
    /// # Returns
    ///
    /// * `Result<String, AppError>` - Raw model text, possibly fenced.
    pub async fn generate_content(&self, prompt: &str) -> Result<String, AppError> {
        match self.breaker.call(self.request(prompt)).await {
            Ok(text) => Ok(text),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Gemini circuit open, rejecting call");
                Err(AppError::ExternalApiError(
                    "Gemini temporarily unavailable (circuit open)".to_string(),
                ))
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<String, AppError> {
        // The key is a query parameter; never log the full URL
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        tracing::info!("Calling Gemini model {}", self.model);

        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Gemini request failed: {}", e.without_url()))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Gemini returned {}: {}",
                status, error_text
            )));
        }

        let data: GenerateResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!(
                "Failed to parse Gemini response: {}",
                e.without_url()
            ))
        })?;

        let text: String = data
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AppError::ExternalApiError(
                "Gemini returned no candidates".to_string(),
            ));
        }

        tracing::info!("✓ Gemini replied with {} chars", text.len());
        Ok(text)
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, AppError> {
        self.generate_content(prompt).await
    }
}
