//! Gemini `generateContent` client and its credential-backed resolver.
//!
//! Behaviour:
//! - One stateless `POST {base_url}/models/{model}:generateContent` per question.
//! - The API key travels in the `x-goog-api-key` header.
//! - The reply text is the concatenation of the first candidate's text parts.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chat::core::config::LlmConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::llm::completion::{CompletionClient, CompletionFuture, CompletionResolver};
use crate::llm::credentials::CredentialStore;

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Connect timeout for the completion endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept in [`ChatError::HttpStatus`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Async Gemini client bound to one API key and model.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f64>,
    max_output_tokens: Option<u32>,
}

impl GeminiClient {
    /// Build a client with its own HTTP pool.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, config: &LlmConfig) -> ChatResult<Self> {
        Ok(Self::with_http(build_http(config)?, api_key, config))
    }

    /// Build a client sharing an existing HTTP pool.
    #[must_use]
    pub fn with_http(client: Client, api_key: impl Into<String>, config: &LlmConfig) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }

    fn build_request<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        let generation_config = (self.temperature.is_some() || self.max_output_tokens.is_some())
            .then_some(GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            });
        GenerateRequest {
            contents: [RequestContent {
                role: "user",
                parts: [RequestPart { text: prompt }],
            }],
            generation_config,
        }
    }

    async fn post_generate(&self, prompt: &str) -> ChatResult<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&self.build_request(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_on_char_boundary(&mut body, MAX_ERROR_BODY);
            return Err(ChatError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response.json::<GenerateResponse>().await?;
        debug!(model = %self.model, candidates = parsed.candidates.len(), "Completion received");
        extract_text(parsed)
    }
}

impl CompletionClient for GeminiClient {
    fn generate(&self, prompt: &str) -> CompletionFuture<'_, ChatResult<String>> {
        let prompt = prompt.to_string();
        Box::pin(async move { self.post_generate(&prompt).await })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Builds a [`GeminiClient`] from the stored API key on every resolution,
/// so a key saved after startup takes effect on the next send.
pub struct GeminiResolver {
    credentials: Arc<dyn CredentialStore>,
    config: LlmConfig,
    http: Client,
}

impl GeminiResolver {
    /// Create a resolver reading keys from `credentials`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(credentials: Arc<dyn CredentialStore>, config: LlmConfig) -> ChatResult<Self> {
        let http = build_http(&config)?;
        Ok(Self {
            credentials,
            config,
            http,
        })
    }
}

impl CompletionResolver for GeminiResolver {
    fn resolve(&self) -> CompletionFuture<'_, ChatResult<Arc<dyn CompletionClient>>> {
        Box::pin(async move {
            let api_key = self
                .credentials
                .load_api_key()
                .await?
                .ok_or(ChatError::MissingCredential)?;
            let client: Arc<dyn CompletionClient> = Arc::new(GeminiClient::with_http(
                self.http.clone(),
                api_key,
                &self.config,
            ));
            Ok(client)
        })
    }
}

fn build_http(config: &LlmConfig) -> ChatResult<Client> {
    Ok(Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()?)
}

fn extract_text(response: GenerateResponse) -> ChatResult<String> {
    let text: String = response
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

    if !text.is_empty() {
        return Ok(text);
    }

    match response.prompt_feedback.and_then(|f| f.block_reason) {
        Some(reason) => Err(ChatError::MalformedResponse(format!(
            "prompt blocked: {reason}"
        ))),
        None => Err(ChatError::MalformedResponse(
            "response contained no text".to_string(),
        )),
    }
}

fn truncate_on_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
