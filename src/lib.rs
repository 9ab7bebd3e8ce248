//! ConvoAI - a conversational assistant with per-user memory.
//!
//! Keeps each user's dialogue history and a small derived profile, frames
//! personality-conditioned prompts for an external completion provider,
//! and cleans up whatever comes back before replying.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod logging;
pub mod personality;
pub mod providers;
pub mod server;
pub mod store;

use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::engine::{EngineSettings, ProviderState, SynthesisEngine};
use crate::personality::PersonalityCatalog;
use crate::store::sqlite::SqliteStore;

/// Wire up a [`SynthesisEngine`] from configuration.
///
/// Opens (creating if needed) the SQLite database and personality catalog
/// under the configured paths, builds the provider and probes it once when
/// `probe_on_start` is set.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the provider
/// configuration is invalid.
pub async fn build_engine(config: &Config) -> anyhow::Result<SynthesisEngine> {
    if let Some(parent) = config.paths.database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.paths.database)
        .await
        .with_context(|| format!("failed to open {}", config.paths.database.display()))?;

    let catalog = PersonalityCatalog::load(
        &config.paths.personalities,
        &config.conversation.default_personality,
    );

    let provider =
        providers::build_provider(&config.provider).context("failed to build completion provider")?;
    let settings = EngineSettings::from_config(config);

    let store = Arc::new(store);
    let catalog = Arc::new(catalog);
    let engine = if config.provider.probe_on_start {
        SynthesisEngine::start(store, catalog, provider, settings).await
    } else {
        SynthesisEngine::with_state(store, catalog, provider, settings, ProviderState::Ready)
    };
    Ok(engine)
}
