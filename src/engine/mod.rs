//! Synthesis engine: one turn in, one reply out.
//!
//! The [`SynthesisEngine`] records the user message, builds a
//! personality-conditioned prompt from recent history and the caller's
//! profile, asks the [`CompletionProvider`] for a continuation, sanitizes it
//! (regenerating once if the result is degenerate), records the reply and
//! finally updates the profile from what the user said.
//!
//! Generation problems never surface as errors: the caller always gets
//! text back. Only store failures are returned as [`EngineError`].

pub mod heuristics;
pub mod prompt;
pub mod sanitizer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::personality::{display_personality, CatalogError, PersonalityCatalog, Session};
use crate::providers::{CompletionProvider, GenerationOptions, ProviderError};
use crate::store::{ConversationStats, ConversationStore, Role, StoreError, UserProfile};

use self::prompt::{PromptAssembler, PromptLabels, RETRY_LEAD};
use self::sanitizer::Sanitizer;

/// Reply used while the provider is unavailable.
pub const LOADING_MESSAGE: &str =
    "Sorry, my AI brain is still loading. Give me a moment and try again!";

/// Reply used when a provider call fails or times out.
pub const APOLOGY_MESSAGE: &str =
    "I'm having trouble with my AI processing right now. Could you try rephrasing that?";

// ---------------------------------------------------------------------------
// State and errors
// ---------------------------------------------------------------------------

/// Provider readiness as seen by the engine.
///
/// Discovered once at startup. A call that finds the provider unreachable
/// demotes `Ready` to `Unavailable` until the process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProviderState {
    /// Not yet probed.
    Uninitialized = 0,
    /// Generation is attempted.
    Ready = 1,
    /// Generation is skipped; canned replies only.
    Unavailable = 2,
}

impl ProviderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::Unavailable,
            _ => Self::Uninitialized,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Errors a turn can surface. Only storage failures qualify.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The message or profile store failed; the turn was aborted.
    #[error("conversation store failure: {0}")]
    Store(#[from] StoreError),
}

/// Result of a personality switch, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonalitySwitch {
    /// Whether the session now points at the requested personality.
    pub ok: bool,
    /// Human-readable outcome.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunables for prompt shape, sampling and reply bounds.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Speaker labels and assistant name.
    pub labels: PromptLabels,
    /// Prior messages included in a prompt.
    pub history_window: usize,
    /// First-attempt sampling options.
    pub primary: GenerationOptions,
    /// Retry sampling options.
    pub retry: GenerationOptions,
    /// Minimum reply length in chars.
    pub min_chars: usize,
    /// Maximum reply length in chars.
    pub max_chars: usize,
    /// Upper bound on a single provider call.
    pub call_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            labels: PromptLabels::default(),
            history_window: 3,
            primary: GenerationOptions::default(),
            retry: GenerationOptions::retry(),
            min_chars: 3,
            max_chars: 200,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineSettings {
    /// Settings derived from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Self {
        let conv = &config.conversation;
        Self {
            labels: PromptLabels {
                human: conv.human_label.clone(),
                assistant: conv.assistant_label.clone(),
                assistant_name: conv.assistant_name.clone(),
            },
            history_window: conv.history_window,
            primary: config.generation.primary.clone(),
            retry: shorter_and_hotter(&config.generation.primary, &config.generation.retry),
            min_chars: config.sanitizer.min_chars,
            max_chars: config.sanitizer.max_chars,
            call_timeout: Duration::from_secs(config.provider.timeout_secs.max(1)),
        }
    }
}

/// The retry must ask for fewer tokens and sample at least as hot as the
/// first attempt; configured values that break this are pulled back in.
fn shorter_and_hotter(
    primary: &GenerationOptions,
    retry: &GenerationOptions,
) -> GenerationOptions {
    let mut retry = retry.clone();
    if primary.max_new_tokens > 1 && retry.max_new_tokens >= primary.max_new_tokens {
        let capped = primary.max_new_tokens.saturating_sub(1);
        warn!(
            retry = retry.max_new_tokens,
            primary = primary.max_new_tokens,
            capped,
            "retry max_new_tokens not below first attempt; capping"
        );
        retry.max_new_tokens = capped;
    }
    if retry.temperature < primary.temperature {
        warn!(
            retry = f64::from(retry.temperature),
            primary = f64::from(primary.temperature),
            "retry temperature below first attempt; raising"
        );
        retry.temperature = primary.temperature;
    }
    if let Some(min) = retry.min_new_tokens {
        retry.min_new_tokens = Some(min.min(retry.max_new_tokens));
    }
    retry
}

// ---------------------------------------------------------------------------
// Per-user turn serialization
// ---------------------------------------------------------------------------

/// One async mutex per user id; turns for the same user run one at a time.
#[derive(Debug, Default)]
struct TurnLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnLocks {
    async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            // Forget locks nobody holds or waits on.
            locks.retain(|key, l| key == user_id || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(user_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Orchestrates stores, catalog, prompt assembly, provider and sanitizer.
pub struct SynthesisEngine {
    store: Arc<dyn ConversationStore>,
    catalog: Arc<PersonalityCatalog>,
    provider: Arc<dyn CompletionProvider>,
    assembler: PromptAssembler,
    sanitizer: Sanitizer,
    primary: GenerationOptions,
    retry: GenerationOptions,
    call_timeout: Duration,
    state: AtomicU8,
    turn_locks: TurnLocks,
}

impl std::fmt::Debug for SynthesisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisEngine")
            .field("model", &self.provider.model_id())
            .field("state", &self.provider_state())
            .finish_non_exhaustive()
    }
}

impl SynthesisEngine {
    /// Build an engine in a known provider state, without probing.
    pub fn with_state(
        store: Arc<dyn ConversationStore>,
        catalog: Arc<PersonalityCatalog>,
        provider: Arc<dyn CompletionProvider>,
        settings: EngineSettings,
        state: ProviderState,
    ) -> Self {
        let stops = settings.labels.stop_sequences();
        Self {
            store,
            catalog,
            provider,
            sanitizer: Sanitizer::new(&settings.labels, settings.min_chars, settings.max_chars),
            assembler: PromptAssembler::new(settings.labels, settings.history_window),
            primary: settings.primary.with_stop(stops.clone()),
            retry: settings.retry.with_stop(stops),
            call_timeout: settings.call_timeout,
            state: AtomicU8::new(state as u8),
            turn_locks: TurnLocks::default(),
        }
    }

    /// Build an engine and probe the provider once to decide readiness.
    pub async fn start(
        store: Arc<dyn ConversationStore>,
        catalog: Arc<PersonalityCatalog>,
        provider: Arc<dyn CompletionProvider>,
        settings: EngineSettings,
    ) -> Self {
        let engine = Self::with_state(
            store,
            catalog,
            provider,
            settings,
            ProviderState::Uninitialized,
        );

        let state = match tokio::time::timeout(engine.call_timeout, engine.provider.probe()).await
        {
            Ok(Ok(())) => {
                info!(model = engine.provider.model_id(), "completion provider ready");
                ProviderState::Ready
            }
            Ok(Err(e)) => {
                warn!(model = engine.provider.model_id(), error = %e, "completion provider unavailable, using canned replies");
                ProviderState::Unavailable
            }
            Err(_) => {
                warn!(model = engine.provider.model_id(), "completion provider probe timed out, using canned replies");
                ProviderState::Unavailable
            }
        };
        engine.state.store(state as u8, Ordering::SeqCst);
        engine
    }

    /// Current provider readiness.
    pub fn provider_state(&self) -> ProviderState {
        ProviderState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// One-line readiness summary for front ends.
    pub fn status_line(&self) -> String {
        let model = self.provider.model_id();
        match self.provider_state() {
            ProviderState::Ready => format!("AI model '{model}' ready"),
            ProviderState::Unavailable => {
                format!("AI model '{model}' unavailable, replying with fallbacks")
            }
            ProviderState::Uninitialized => format!("AI model '{model}' not initialized"),
        }
    }

    /// The personality catalog.
    pub fn catalog(&self) -> &PersonalityCatalog {
        &self.catalog
    }

    /// Fresh session on the catalog's default personality.
    pub fn new_session(&self) -> Session {
        self.catalog.new_session()
    }

    /// A random greeting in the session's personality.
    pub fn greeting(&self, session: &Session) -> String {
        self.catalog.get(&session.personality).random_greeting()
    }

    // -- Exposed operations ---------------------------------------------------

    /// Process one user turn and return the reply.
    ///
    /// `personality_key` selects the personality for this turn; unknown or
    /// absent keys use the catalog default.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if recording the turn fails. No reply
    /// is returned for a turn that was not recorded.
    pub async fn submit(
        &self,
        user_id: &str,
        text: &str,
        personality_key: Option<&str>,
    ) -> Result<String, EngineError> {
        self.submit_with(user_id, text, personality_key, None).await
    }

    /// [`submit`](Self::submit) using the session's personality and id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if recording the turn fails.
    pub async fn submit_in(
        &self,
        session: &Session,
        user_id: &str,
        text: &str,
    ) -> Result<String, EngineError> {
        self.submit_with(user_id, text, Some(&session.personality), Some(&session.id))
            .await
    }

    /// Point `session` at personality `key`.
    ///
    /// Unknown keys leave the session untouched and list the valid ones.
    pub fn switch_personality(&self, session: &mut Session, key: &str) -> PersonalitySwitch {
        match self.catalog.switch(session, key) {
            Ok(()) => {
                info!(session = %session.id, personality = key, "personality switched");
                PersonalitySwitch {
                    ok: true,
                    message: format!(
                        "🎭 Switched to {} personality! My replies will adapt to this new style.",
                        display_personality(key)
                    ),
                }
            }
            Err(CatalogError::UnknownPersonality { key, available }) => PersonalitySwitch {
                ok: false,
                message: format!(
                    "❌ Personality '{key}' not found. Available: {}",
                    available.join(", ")
                ),
            },
            Err(e) => PersonalitySwitch {
                ok: false,
                message: format!("❌ {e}"),
            },
        }
    }

    /// Current profile for `user_id` (an empty one for unknown users).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the profile cannot be read.
    pub async fn profile_snapshot(&self, user_id: &str) -> Result<UserProfile, EngineError> {
        Ok(self.store.get_profile(user_id).await?)
    }

    /// History counters for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the log cannot be read.
    pub async fn stats(&self, user_id: &str) -> Result<ConversationStats, EngineError> {
        Ok(self.store.stats(user_id).await?)
    }

    /// Forget everything about `user_id`. Waits for any in-flight turn.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the delete fails.
    pub async fn clear(&self, user_id: &str) -> Result<(), EngineError> {
        let _turn = self.turn_locks.acquire(user_id).await;
        self.store.clear_user(user_id).await?;
        info!(user_id, "user data cleared");
        Ok(())
    }

    // -- Turn pipeline --------------------------------------------------------

    /// Full-control turn entry point: explicit personality and session id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if recording the turn fails.
    pub async fn submit_with(
        &self,
        user_id: &str,
        text: &str,
        personality_key: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<String, EngineError> {
        let _turn = self.turn_locks.acquire(user_id).await;

        self.store
            .append(user_id, Role::User, text, session_id)
            .await?;

        let reply = if self.provider_state() == ProviderState::Ready {
            self.generate(user_id, text, personality_key).await?
        } else {
            debug!(user_id, state = self.provider_state().as_str(), "provider not ready, sending loading reply");
            LOADING_MESSAGE.to_owned()
        };

        self.store
            .append(user_id, Role::Assistant, &reply, session_id)
            .await?;

        self.update_profile(user_id, text).await;
        Ok(reply)
    }

    async fn generate(
        &self,
        user_id: &str,
        text: &str,
        personality_key: Option<&str>,
    ) -> Result<String, EngineError> {
        let personality = self
            .catalog
            .get(personality_key.unwrap_or(self.catalog.default_key()));

        let window = self.assembler.history_window();
        let mut history = self.store.recent(user_id, window.saturating_add(1)).await?;
        // The message just appended is rendered as the trailing turn instead.
        history.pop();
        let profile = self.store.get_profile(user_id).await?;

        let prompt = self.assembler.assemble(&personality, &profile, &history, text);
        let raw = match self.invoke(&prompt, &self.primary).await {
            Ok(raw) => raw,
            Err(e) => {
                self.note_failure(&e);
                return Ok(APOLOGY_MESSAGE.to_owned());
            }
        };

        let first = self.sanitizer.sanitize(&raw, &prompt, text);
        if !first.is_degenerate() {
            return Ok(first.text);
        }
        debug!(user_id, outcome = ?first.outcome, "degenerate reply, regenerating once");

        let retry_prompt = self.assembler.simplified(text);
        match self.invoke(&retry_prompt, &self.retry).await {
            Ok(raw) => {
                let second = self.sanitizer.sanitize(&raw, &retry_prompt, text);
                if second.is_degenerate() {
                    Ok(second.text)
                } else {
                    Ok(self.sanitizer.clamp(&format!("{RETRY_LEAD} {}", second.text)))
                }
            }
            Err(e) => {
                self.note_failure(&e);
                Ok(first.text)
            }
        }
    }

    async fn invoke(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.call_timeout, self.provider.complete(prompt, options)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                after_secs: self.call_timeout.as_secs(),
            }),
        }
    }

    fn note_failure(&self, error: &ProviderError) {
        warn!(model = self.provider.model_id(), error = %error, "completion call failed");
        if error.is_unreachable()
            && self
                .state
                .compare_exchange(
                    ProviderState::Ready as u8,
                    ProviderState::Unavailable as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        {
            warn!(model = self.provider.model_id(), "provider unreachable, switching to canned replies until restart");
        }
    }

    /// Best-effort: store failures here are logged, never returned.
    async fn update_profile(&self, user_id: &str, text: &str) {
        if let Some(name) = heuristics::extract_name(text) {
            match self.store.set_name(user_id, &name).await {
                Ok(()) => debug!(user_id, name = %name, "display name recorded"),
                Err(e) => warn!(user_id, error = %e, "failed to record display name"),
            }
        }

        for category in heuristics::extract_interests(text) {
            match self.store.add_interest(user_id, category).await {
                Ok(true) => debug!(user_id, category, "interest recorded"),
                Ok(false) => {}
                Err(e) => warn!(user_id, category, error = %e, "failed to record interest"),
            }
        }
    }
}
