use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docqa_core::config::LlmSettings;
use docqa_core::{Error, LanguageModel, Result};

/// Gemini `generateContent` over REST.
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    /// Read from the configured env var at construction; a missing key only
    /// fails when a completion is requested.
    api_key: Option<String>,
    api_key_env: String,
}

impl GeminiClient {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        let api_key = env::var(&settings.api_key_env).ok().filter(|k| !k.trim().is_empty());
        Self {
            client: Client::default(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            api_key,
            api_key_env: settings.api_key_env.clone(),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
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
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    /// Text of the first candidate, parts concatenated.
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();
        Some(text)
    }
}

fn request_body(prompt: &str, temperature: f32) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: vec![Content { role: "user", parts: vec![Part { text: prompt }] }],
        generation_config: GenerationConfig { temperature },
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::LanguageModel(format!("{} is not set", self.api_key_env)))?;

        debug!(model = %self.model, prompt_chars = prompt.len(), "calling gemini");
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&request_body(prompt, self.temperature))
            .send()
            .await
            .map_err(|e| Error::LanguageModel(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::LanguageModel(format!("gemini error {status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::LanguageModel(format!("unreadable response: {e}")))?;
        parsed.into_text().ok_or_else(|| Error::LanguageModel("response had no candidates".to_string()))
    }
}
