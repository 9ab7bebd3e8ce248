//! Personality catalog and per-session personality pointer.
//!
//! The catalog is an ordered list of named style descriptors with one
//! designated default. Lookups never fail: an unknown key resolves to the
//! default entry. Only [`PersonalityCatalog::switch`] is strict about keys.
//!
//! Optionally backed by a JSON file. A missing file is seeded with the
//! built-ins; a corrupt one is ignored with a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key of the built-in default personality.
pub const DEFAULT_PERSONALITY: &str = "friendly_assistant";

/// A named style configuration influencing prompt framing and tone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    /// Unique catalog key (`snake_case`).
    pub key: String,
    /// Human-readable label.
    pub display_name: String,
    /// One-line behavior description used in the prompt framing.
    pub description: String,
    /// Named trait weights, each in `[0, 1]`.
    #[serde(default)]
    pub trait_weights: BTreeMap<String, f64>,
    /// Short clause describing how replies should sound.
    #[serde(default)]
    pub prompt_style_hint: String,
    /// Canned openers for front ends.
    #[serde(default)]
    pub greetings: Vec<String>,
}

impl Personality {
    /// Force every trait weight into `[0, 1]`. Non-finite weights become 0.
    fn clamp_weights(&mut self) {
        for weight in self.trait_weights.values_mut() {
            *weight = if weight.is_finite() {
                weight.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
    }

    /// Pick one of the greetings at random, or a generic one if none exist.
    pub fn random_greeting(&self) -> String {
        self.greetings
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| format!("Hello! I'm your {}.", self.display_name))
    }
}

/// Errors from catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// `add` was called with an empty key.
    #[error("personality key must not be empty")]
    EmptyKey,

    /// `switch` was asked for a key that is not in the catalog.
    #[error("personality '{key}' not found. Available: {}", available.join(", "))]
    UnknownPersonality {
        /// The rejected key.
        key: String,
        /// Every valid key, in catalog order.
        available: Vec<String>,
    },

    /// Catalog file could not be read or written.
    #[error("catalog file error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog file is not valid JSON.
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Logical conversation scope holding the current personality pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Random session identifier, recorded alongside stored messages.
    pub id: String,
    /// Key of the current personality. Always a catalog key.
    pub personality: String,
}

impl Session {
    /// New session pointing at `personality`.
    pub fn new(personality: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            personality: personality.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

fn builtin(
    key: &str,
    display_name: &str,
    description: &str,
    weights: [f64; 4],
    hint: &str,
    greetings: &[&str],
) -> Personality {
    let names = ["helpfulness", "curiosity", "humor", "formality"];
    Personality {
        key: key.to_owned(),
        display_name: display_name.to_owned(),
        description: description.to_owned(),
        trait_weights: names
            .iter()
            .zip(weights)
            .map(|(n, w)| ((*n).to_owned(), w))
            .collect(),
        prompt_style_hint: hint.to_owned(),
        greetings: greetings.iter().map(|g| (*g).to_owned()).collect(),
    }
}

fn friendly_assistant() -> Personality {
    builtin(
        DEFAULT_PERSONALITY,
        "Friendly Assistant",
        "Helpful, professional, and warm",
        [0.9, 0.7, 0.5, 0.6],
        "responds naturally and warmly",
        &[
            "Hello there! 😊",
            "Hi! Great to see you!",
            "Hey! How's your day going?",
            "Hello! I'm here to help!",
        ],
    )
}

/// The built-in catalog, in catalog order. The first entry is the default.
pub fn builtin_personalities() -> Vec<Personality> {
    vec![
        friendly_assistant(),
        builtin(
            "curious_explorer",
            "Curious Explorer",
            "Inquisitive, loves learning, asks lots of questions",
            [0.8, 0.95, 0.7, 0.3],
            "asks follow-up questions about what it hears",
            &[
                "Oh wow, hello! 🤔",
                "Hi there! I'm so curious about you!",
                "Hello! Tell me something fascinating!",
            ],
        ),
        builtin(
            "wise_mentor",
            "Wise Mentor",
            "Thoughtful, gives advice, philosophical",
            [0.85, 0.8, 0.4, 0.8],
            "answers thoughtfully with a reflective tone",
            &[
                "Greetings, my friend.",
                "Welcome. What wisdom do you seek today?",
                "Good day. How may I guide you?",
            ],
        ),
        builtin(
            "playful_companion",
            "Playful Companion",
            "Fun, jokes around, casual and energetic",
            [0.8, 0.6, 0.95, 0.2],
            "keeps things light with jokes and energy",
            &[
                "Hey hey hey! 🎉",
                "Yo! What's poppin'?",
                "What's up, awesome human?!",
            ],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Ordered personality catalog with a designated default.
#[derive(Debug)]
pub struct PersonalityCatalog {
    entries: RwLock<Vec<Personality>>,
    default_key: String,
    path: Option<PathBuf>,
}

impl Default for PersonalityCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PersonalityCatalog {
    /// In-memory catalog of the built-ins.
    pub fn builtin() -> Self {
        Self::from_entries(builtin_personalities(), DEFAULT_PERSONALITY)
    }

    /// In-memory catalog over `entries`.
    ///
    /// If `default_key` is not among the entries, the first entry becomes
    /// the default. An empty list is replaced by the built-ins.
    pub fn from_entries(mut entries: Vec<Personality>, default_key: &str) -> Self {
        if entries.is_empty() {
            entries = builtin_personalities();
        }
        for entry in &mut entries {
            entry.clamp_weights();
        }
        let default_key = if entries.iter().any(|p| p.key == default_key) {
            default_key.to_owned()
        } else {
            entries
                .first()
                .map_or_else(|| DEFAULT_PERSONALITY.to_owned(), |p| p.key.clone())
        };
        Self {
            entries: RwLock::new(entries),
            default_key,
            path: None,
        }
    }

    /// Load the catalog from a JSON file, attaching it for persistence.
    ///
    /// A missing file is created with the built-ins. An unreadable or
    /// malformed file is logged and the built-ins are used; this never
    /// fails.
    pub fn load(path: &Path, default_key: &str) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Vec<Personality>>(&raw) {
                Ok(list) => {
                    info!(path = %path.display(), count = list.len(), "loaded personality catalog");
                    list
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "personality catalog is malformed, using built-ins");
                    builtin_personalities()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let list = builtin_personalities();
                if let Err(e) = write_catalog(path, &list) {
                    warn!(path = %path.display(), error = %e, "failed to seed personality catalog");
                } else {
                    info!(path = %path.display(), "seeded personality catalog with built-ins");
                }
                list
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read personality catalog, using built-ins");
                builtin_personalities()
            }
        };

        let mut catalog = Self::from_entries(entries, default_key);
        catalog.path = Some(path.to_path_buf());
        catalog
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Personality>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Personality>> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Key of the default personality.
    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// Look up `key`, falling back to the default personality.
    pub fn get(&self, key: &str) -> Personality {
        let entries = self.read();
        entries
            .iter()
            .find(|p| p.key == key)
            .or_else(|| entries.iter().find(|p| p.key == self.default_key))
            .or_else(|| entries.first())
            .cloned()
            .unwrap_or_else(friendly_assistant)
    }

    /// Whether `key` names a catalog entry.
    pub fn contains(&self, key: &str) -> bool {
        self.read().iter().any(|p| p.key == key)
    }

    /// All keys in catalog order.
    pub fn list_keys(&self) -> Vec<String> {
        self.read().iter().map(|p| p.key.clone()).collect()
    }

    /// Snapshot of every entry in catalog order.
    pub fn list(&self) -> Vec<Personality> {
        self.read().clone()
    }

    /// `(display_name, description)` for `key`, with default fallback.
    pub fn info(&self, key: &str) -> (String, String) {
        let p = self.get(key);
        (p.display_name, p.description)
    }

    /// Insert or replace a personality under `key`.
    ///
    /// New keys are appended to the end of the catalog order; existing keys
    /// keep their position. If a file is attached, the catalog is saved;
    /// a save failure is logged and does not undo the in-memory change.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EmptyKey`] if `key` is blank.
    pub fn add(&self, key: &str, mut personality: Personality) -> Result<(), CatalogError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CatalogError::EmptyKey);
        }
        personality.key = key.to_owned();
        personality.clamp_weights();

        let snapshot = {
            let mut entries = self.write();
            match entries.iter_mut().find(|p| p.key == key) {
                Some(existing) => *existing = personality,
                None => entries.push(personality),
            }
            entries.clone()
        };
        debug!(key, "personality added to catalog");

        if let Some(path) = &self.path {
            if let Err(e) = write_catalog(path, &snapshot) {
                warn!(path = %path.display(), error = %e, "failed to persist personality catalog");
            }
        }
        Ok(())
    }

    /// Point `session` at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownPersonality`] listing every valid key
    /// if `key` is not in the catalog. The session is left unchanged.
    pub fn switch(&self, session: &mut Session, key: &str) -> Result<(), CatalogError> {
        if !self.contains(key) {
            return Err(CatalogError::UnknownPersonality {
                key: key.to_owned(),
                available: self.list_keys(),
            });
        }
        session.personality = key.to_owned();
        Ok(())
    }

    /// Fresh session pointing at the default personality.
    pub fn new_session(&self) -> Session {
        Session::new(&self.default_key)
    }
}

/// Render a catalog key as a title-cased label (`wise_mentor` -> `Wise Mentor`).
pub fn display_personality(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_catalog(path: &Path, entries: &[Personality]) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, json)?;
    Ok(())
}
