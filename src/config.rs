//! Configuration loading and management.
//!
//! Loads configuration from `~/.convoai/config.toml` (or `$CONVOAI_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//! A missing file is not an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

use crate::personality::DEFAULT_PERSONALITY;
use crate::providers::ollama::DEFAULT_OLLAMA_URL;
use crate::providers::openai::DEFAULT_OPENAI_URL;
use crate::providers::GenerationOptions;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Completion backend (`[provider]`).
    pub provider: ProviderConfig,
    /// Sampling settings (`[generation]`, `[generation.retry]`).
    pub generation: GenerationConfig,
    /// Reply length bounds (`[sanitizer]`).
    pub sanitizer: SanitizerConfig,
    /// Prompt labels and history window (`[conversation]`).
    pub conversation: ConversationConfig,
    /// Filesystem locations (`[paths]`).
    pub paths: PathsConfig,
    /// HTTP front end (`[server]`).
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = Self::config_path_with(env)?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(env);
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides. Missing file => defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config at {}", path.display()))
            }
        }
    }

    /// Resolve config path using a custom env resolver.
    ///
    /// Checks `$CONVOAI_CONFIG_PATH` first, then `~/.convoai/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if no env path is set and the home directory is unknown.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(p) = env("CONVOAI_CONFIG_PATH") {
            return Ok(PathBuf::from(p));
        }
        Ok(config_dir()?.join("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Provider.
        if let Some(v) = env("CONVOAI_PROVIDER") {
            match ProviderKind::parse(&v) {
                Some(kind) => self.provider.kind = kind,
                None => tracing::warn!(
                    var = "CONVOAI_PROVIDER",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("CONVOAI_PROVIDER_URL") {
            self.provider.base_url = Some(v);
        }
        if let Some(v) = env("CONVOAI_MODEL") {
            self.provider.model = v;
        }
        if let Some(v) = env("CONVOAI_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = env("CONVOAI_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.provider.timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "CONVOAI_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Paths.
        if let Some(v) = env("CONVOAI_DATABASE") {
            self.paths.database = PathBuf::from(v);
        }
        if let Some(v) = env("CONVOAI_PERSONALITIES") {
            self.paths.personalities = PathBuf::from(v);
        }
        if let Some(v) = env("CONVOAI_LOGS") {
            self.paths.logs = PathBuf::from(v);
        }

        // Server.
        if let Some(v) = env("CONVOAI_BIND") {
            self.server.bind = v;
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly typed values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

/// Resolve the default data directory (`~/.convoai/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".convoai"))
}

/// Data directory, or `./.convoai` when there is no home directory.
fn data_dir_or_local() -> PathBuf {
    config_dir().unwrap_or_else(|_| PathBuf::from(".convoai"))
}

// ── Provider config ─────────────────────────────────────────────

/// Which completion API to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama `/api/generate`.
    #[default]
    Ollama,
    /// OpenAI-compatible `/v1/completions`.
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

impl ProviderKind {
    /// Parse a provider name as used in env overrides.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openai" | "openai-compatible" => Some(Self::OpenAi),
            _ => None,
        }
    }
}

/// Completion backend settings (`[provider]`).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Backend API flavor.
    pub kind: ProviderKind,
    /// Base URL; `None` uses the default for `kind`.
    pub base_url: Option<String>,
    /// Model name passed to the backend.
    pub model: String,
    /// Bearer token for OpenAI-compatible servers.
    pub api_key: Option<String>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Probe the backend once at startup.
    pub probe_on_start: bool,
}

impl ProviderConfig {
    /// The configured base URL, or the default for this provider kind.
    pub fn effective_base_url(&self) -> String {
        match (&self.base_url, self.kind) {
            (Some(url), _) => url.clone(),
            (None, ProviderKind::Ollama) => DEFAULT_OLLAMA_URL.to_owned(),
            (None, ProviderKind::OpenAi) => DEFAULT_OPENAI_URL.to_owned(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            base_url: None,
            model: "tinyllama".to_owned(),
            api_key: None,
            timeout_secs: 30,
            probe_on_start: true,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "__REDACTED__"))
            .field("timeout_secs", &self.timeout_secs)
            .field("probe_on_start", &self.probe_on_start)
            .finish()
    }
}

// ── Generation config ───────────────────────────────────────────

/// Sampling settings for the first attempt and the single retry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// First-attempt options (top-level keys of `[generation]`).
    #[serde(flatten)]
    pub primary: GenerationOptions,
    /// Retry options (`[generation.retry]`). Unset keys take the retry
    /// defaults from [`GenerationOptions::retry`].
    #[serde(deserialize_with = "retry_over_defaults")]
    pub retry: GenerationOptions,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            primary: GenerationOptions::default(),
            retry: GenerationOptions::retry(),
        }
    }
}

/// Keys a `[generation.retry]` table may set. Each one present replaces
/// the matching retry default; absent keys leave it untouched.
#[derive(Debug, Default, Deserialize)]
struct GenerationOverrides {
    max_new_tokens: Option<u32>,
    min_new_tokens: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    repetition_penalty: Option<f32>,
    no_repeat_ngram: Option<u32>,
    stop: Option<Vec<String>>,
}

impl GenerationOverrides {
    fn apply(self, mut base: GenerationOptions) -> GenerationOptions {
        if let Some(v) = self.max_new_tokens {
            base.max_new_tokens = v;
        }
        if let Some(v) = self.min_new_tokens {
            base.min_new_tokens = Some(v);
        }
        if let Some(v) = self.temperature {
            base.temperature = v;
        }
        if let Some(v) = self.top_p {
            base.top_p = Some(v);
        }
        if let Some(v) = self.top_k {
            base.top_k = Some(v);
        }
        if let Some(v) = self.repetition_penalty {
            base.repetition_penalty = Some(v);
        }
        if let Some(v) = self.no_repeat_ngram {
            base.no_repeat_ngram = Some(v);
        }
        if let Some(v) = self.stop {
            base.stop = v;
        }
        base
    }
}

fn retry_over_defaults<'de, D>(deserializer: D) -> Result<GenerationOptions, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(GenerationOverrides::deserialize(deserializer)?.apply(GenerationOptions::retry()))
}

// ── Sanitizer config ────────────────────────────────────────────

/// Reply length bounds (`[sanitizer]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Replies shorter than this (in chars) are replaced.
    pub min_chars: usize,
    /// Replies longer than this are cut to their first sentence.
    pub max_chars: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            min_chars: 3,
            max_chars: 200,
        }
    }
}

// ── Conversation config ─────────────────────────────────────────

/// Prompt framing settings (`[conversation]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// How many prior messages go into the prompt.
    pub history_window: usize,
    /// Label for user turns.
    pub human_label: String,
    /// Label for assistant turns.
    pub assistant_label: String,
    /// Name the assistant introduces itself with.
    pub assistant_name: String,
    /// Personality new sessions start with.
    pub default_personality: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_window: 3,
            human_label: "Human".to_owned(),
            assistant_label: "AI".to_owned(),
            assistant_name: "ConvoAI".to_owned(),
            default_personality: DEFAULT_PERSONALITY.to_owned(),
        }
    }
}

// ── Paths config ────────────────────────────────────────────────

/// Filesystem locations (`[paths]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SQLite conversation database.
    pub database: PathBuf,
    /// JSON personality catalog.
    pub personalities: PathBuf,
    /// Directory for rolling JSON logs.
    pub logs: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = data_dir_or_local();
        Self {
            database: base.join("convoai.db"),
            personalities: base.join("personalities.json"),
            logs: base.join("logs"),
        }
    }
}

// ── Server config ───────────────────────────────────────────────

/// HTTP front end settings (`[server]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_owned(),
        }
    }
}
