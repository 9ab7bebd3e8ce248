//! Completion provider abstraction layer.
//!
//! Defines the [`CompletionProvider`] trait: a black box that extends a
//! prompt with generated text. The engine never assumes streaming.
//!
//! Two providers are implemented:
//! - [`ollama::OllamaProvider`] - Ollama `/api/generate` API
//! - [`openai::OpenAiCompatibleProvider`] - OpenAI-style `/v1/completions`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{ProviderConfig, ProviderKind};

pub mod ollama;
pub mod openai;

// ---------------------------------------------------------------------------
// Generation options
// ---------------------------------------------------------------------------

/// Sampling configuration passed with every completion call.
///
/// Providers ignore knobs their API has no equivalent for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    /// Upper bound on generated tokens.
    pub max_new_tokens: u32,
    /// Lower bound on generated tokens, where supported.
    pub min_new_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    /// Top-k sampling cutoff.
    pub top_k: Option<u32>,
    /// Penalty applied to repeated tokens.
    pub repetition_penalty: Option<f32>,
    /// Forbid repeating n-grams of this size, where supported.
    pub no_repeat_ngram: Option<u32>,
    /// Sequences that end generation.
    pub stop: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 50,
            min_new_tokens: Some(5),
            temperature: 0.8,
            top_p: Some(0.9),
            top_k: Some(50),
            repetition_penalty: Some(1.1),
            no_repeat_ngram: Some(3),
            stop: Vec::new(),
        }
    }
}

impl GenerationOptions {
    /// Settings for the single regeneration attempt: hotter and shorter.
    pub fn retry() -> Self {
        Self {
            max_new_tokens: 20,
            min_new_tokens: None,
            temperature: 1.0,
            ..Self::default()
        }
    }

    /// Copy of these options with extra stop sequences appended.
    pub fn with_stop<I>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut opts = self.clone();
        for s in extra {
            if !opts.stop.contains(&s) {
                opts.stop.push(s);
            }
        }
        opts
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by completion providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Provider cannot be reached or is misconfigured.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// The call did not finish within the configured bound.
    #[error("provider call timed out after {after_secs}s")]
    Timeout {
        /// Configured timeout in seconds.
        after_secs: u64,
    },
}

impl ProviderError {
    /// Whether the failure means the provider is gone, not just unhappy
    /// with this one request.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Request(e) => e.is_connect(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers (shared by all providers)
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure, `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse whitespace, redact credential-looking tokens and cap length.
#[doc(hidden)]
pub fn sanitize_http_error_body(raw: &str) -> String {
    const MAX_ERROR_BODY_CHARS: usize = 256;

    let mut sanitized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for pattern in [
        r"sk-[A-Za-z0-9_\-]{20,}",
        r"(?i)bearer\s+[A-Za-z0-9._\-]{16,}",
        r"hf_[A-Za-z0-9]{20,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    sanitized
}

/// Join a base URL and an API path, tolerating a trailing slash on the base.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// External text-completion capability.
///
/// Implementations must be `Send + Sync` so one instance can serve
/// concurrent turns for different users.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Extend `prompt` with generated text.
    ///
    /// The result may or may not include the prompt itself; the sanitizer
    /// handles both.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on network, status, or parse failure.
    async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError>;

    /// Cheap readiness check, run once at engine start.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the backend cannot serve completions.
    async fn probe(&self) -> Result<(), ProviderError>;

    /// The model identifier this provider is instantiated for.
    fn model_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the provider described by `config`.
///
/// # Errors
///
/// Returns [`ProviderError::Unavailable`] if the base URL is invalid, or
/// [`ProviderError::Request`] if the HTTP client cannot be built.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
    let base_url = config.effective_base_url();
    Url::parse(&base_url)
        .map_err(|e| ProviderError::Unavailable(format!("invalid base url {base_url:?}: {e}")))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()?;

    let provider: Arc<dyn CompletionProvider> = match config.kind {
        ProviderKind::Ollama => Arc::new(ollama::OllamaProvider::with_client(
            client,
            base_url,
            config.model.clone(),
        )),
        ProviderKind::OpenAi => Arc::new(openai::OpenAiCompatibleProvider::with_client(
            client,
            base_url,
            config.model.clone(),
            config.api_key.clone(),
        )),
    };
    Ok(provider)
}
