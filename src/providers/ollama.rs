//! Ollama provider implementation using the `/api/generate` API.

use serde::{Deserialize, Serialize};

use super::{check_http_response, endpoint, CompletionProvider, GenerationOptions, ProviderError};

/// Default Ollama API base URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Ollama generate API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OllamaRequest {
    /// Model name.
    pub model: String,
    /// Raw prompt text.
    pub prompt: String,
    /// Always false; the engine wants one complete body.
    pub stream: bool,
    /// Generation options.
    pub options: OllamaOptions,
}

/// Ollama generation options.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OllamaOptions {
    /// Maximum tokens to generate.
    pub num_predict: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Top-k cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Repetition penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Ollama generate API response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OllamaResponse {
    /// Generated continuation (prompt not included).
    pub response: String,
    /// Model that served the response.
    #[serde(default)]
    pub model: String,
    /// Whether generation finished.
    #[serde(default)]
    pub done: bool,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Ollama generate API provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Model name passed to Ollama.
    #[doc(hidden)]
    pub model: String,
    /// Base URL for the Ollama API.
    #[doc(hidden)]
    pub base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create an Ollama provider against the default local server.
    pub fn new(model: String) -> Self {
        Self::with_client(reqwest::Client::new(), DEFAULT_OLLAMA_URL.to_owned(), model)
    }

    /// Create an Ollama provider with an explicit client and base URL.
    pub fn with_client(client: reqwest::Client, base_url: String, model: String) -> Self {
        Self {
            model,
            base_url,
            client,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build an Ollama API request from a prompt and options.
#[doc(hidden)]
pub fn build_request(model: &str, prompt: &str, options: &GenerationOptions) -> OllamaRequest {
    OllamaRequest {
        model: model.to_owned(),
        prompt: prompt.to_owned(),
        stream: false,
        options: OllamaOptions {
            num_predict: options.max_new_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            repeat_penalty: options.repetition_penalty,
            stop: options.stop.clone(),
        },
    }
}

/// Parse an Ollama API response into the generated text.
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the response cannot be deserialized.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<String, ProviderError> {
    let resp: OllamaResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(resp.response)
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let api_request = build_request(&self.model, prompt, options);

        let response = self
            .client
            .post(endpoint(&self.base_url, "/api/generate"))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(endpoint(&self.base_url, "/api/tags"))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("ollama not reachable: {e}")))?;
        check_http_response(response).await?;
        Ok(())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
