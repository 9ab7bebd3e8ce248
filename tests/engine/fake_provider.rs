//! Scripted completion providers for engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use convoai::engine::{EngineSettings, ProviderState, SynthesisEngine};
use convoai::personality::PersonalityCatalog;
use convoai::providers::{CompletionProvider, GenerationOptions, ProviderError};
use convoai::store::memory::InMemoryStore;
use convoai::store::ConversationStore;

/// One recorded `complete` call.
#[derive(Debug, Clone)]
pub struct Call {
    pub prompt: String,
    pub options: GenerationOptions,
}

/// Replays queued results, then repeats `fallback` forever.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: String,
    calls: Mutex<Vec<Call>>,
    count: AtomicUsize,
    probe_ok: bool,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn always(reply: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: reply.to_owned(),
            calls: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
            probe_ok: true,
            delay: None,
        }
    }

    pub fn script<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, ProviderError>>,
    {
        let provider = Self::always("");
        if let Ok(mut script) = provider.script.lock() {
            script.extend(results);
        }
        provider
    }

    pub fn failing_probe(mut self) -> Self {
        self.probe_ok = false;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                prompt: prompt.to_owned(),
                options: options.clone(),
            });
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        // Let other tasks interleave, as a real network call would.
        tokio::task::yield_now().await;

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        if self.probe_ok {
            Ok(())
        } else {
            Err(ProviderError::Unavailable("connection refused".to_owned()))
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

/// Engine over an in-memory store and the built-in catalog.
pub fn engine_with(
    provider: &Arc<ScriptedProvider>,
    state: ProviderState,
) -> (SynthesisEngine, Arc<InMemoryStore>) {
    engine_with_settings(provider, state, EngineSettings::default())
}

pub fn engine_with_settings(
    provider: &Arc<ScriptedProvider>,
    state: ProviderState,
    settings: EngineSettings,
) -> (SynthesisEngine, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let shared_store: Arc<dyn ConversationStore> = store.clone();
    let shared_provider: Arc<dyn CompletionProvider> = provider.clone();
    let engine = SynthesisEngine::with_state(
        shared_store,
        Arc::new(PersonalityCatalog::builtin()),
        shared_provider,
        settings,
        state,
    );
    (engine, store)
}
