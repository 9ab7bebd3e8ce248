//! OpenAI-compatible provider using the legacy `/v1/completions` text API.
//!
//! Works against OpenAI itself and against self-hosted servers that mimic
//! it (vLLM, llama.cpp server, text-generation-inference).

use serde::{Deserialize, Serialize};

use super::{check_http_response, endpoint, CompletionProvider, GenerationOptions, ProviderError};

/// Default base URL for a local OpenAI-compatible server.
pub const DEFAULT_OPENAI_URL: &str = "http://127.0.0.1:8000";

/// The completions API accepts at most four stop sequences.
const MAX_STOP_SEQUENCES: usize = 4;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Completions API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    /// Model identifier.
    pub model: String,
    /// Raw prompt text.
    pub prompt: String,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Completions API response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponse {
    /// Response choices.
    pub choices: Vec<OpenAiChoice>,
    /// Model that served the response.
    #[serde(default)]
    pub model: String,
}

/// A response choice.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    /// Generated text.
    pub text: String,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// OpenAI-compatible text completions provider.
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleProvider {
    /// Create a provider with an explicit client.
    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        model: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            model,
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a completions request from a prompt and options.
#[doc(hidden)]
pub fn build_request(model: &str, prompt: &str, options: &GenerationOptions) -> OpenAiRequest {
    OpenAiRequest {
        model: model.to_owned(),
        prompt: prompt.to_owned(),
        max_tokens: options.max_new_tokens,
        temperature: options.temperature,
        top_p: options.top_p,
        stop: options
            .stop
            .iter()
            .take(MAX_STOP_SEQUENCES)
            .cloned()
            .collect(),
    }
}

/// Parse a completions response into the first choice's text.
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the body is malformed or has no choices.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<String, ProviderError> {
    let resp: OpenAiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    resp.choices
        .into_iter()
        .next()
        .map(|c| c.text)
        .ok_or_else(|| ProviderError::Parse("response contained no choices".to_owned()))
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let api_request = build_request(&self.model, prompt, options);

        let response = self
            .authorize(self.client.post(endpoint(&self.base_url, "/v1/completions")))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let response = self
            .authorize(self.client.get(endpoint(&self.base_url, "/v1/models")))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("completion server not reachable: {e}")))?;
        check_http_response(response).await?;
        Ok(())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
