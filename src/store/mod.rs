//! Per-user conversation log and profile persistence.
//!
//! Two contracts live here: [`MessageStore`] (append-only, insertion-ordered
//! message log) and [`ProfileStore`] (lazily created, mutable user record).
//! [`ConversationStore`] ties them together and adds the atomic
//! "forget this user" operation.
//!
//! Implementations:
//! - [`memory::InMemoryStore`] - process-lifetime maps behind a mutex
//! - [`sqlite::SqliteStore`] - durable SQLite database via `sqlx`

pub mod memory;
pub mod sqlite;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human on the other side of the conversation.
    User,
    /// The assistant's reply.
    Assistant,
}

impl Role {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRole`] if the value is not a known role.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(StoreError::InvalidRole {
                value: other.to_owned(),
            }),
        }
    }
}

/// A single immutable entry in a user's conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Owner of the conversation.
    pub user_id: String,
    /// Who wrote the message.
    pub role: Role,
    /// Message body.
    pub text: String,
    /// When the message was appended. Never earlier than the previous entry.
    pub timestamp: DateTime<Utc>,
    /// Session the message was produced in, if known.
    pub session_id: Option<String>,
}

/// Lightweight profile derived from what the user has told us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Unique user key.
    pub user_id: String,
    /// Name the user asked to be called, if any.
    pub display_name: Option<String>,
    /// Interest categories (duplicates impossible by construction).
    pub interests: BTreeSet<String>,
    /// First time this user was seen.
    pub first_seen: DateTime<Utc>,
    /// Most recent append for this user.
    pub last_seen: DateTime<Utc>,
}

impl UserProfile {
    /// Fresh profile with no name and no interests.
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_owned(),
            display_name: None,
            interests: BTreeSet::new(),
            first_seen: now,
            last_seen: now,
        }
    }
}

/// Summary counters for a user's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStats {
    /// Number of stored messages (both roles).
    pub total_messages: u64,
    /// Timestamp of the oldest stored message.
    pub first_message_at: Option<DateTime<Utc>>,
    /// Whether any history exists.
    pub has_history: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Maximum allowed message size in bytes.
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Errors from store operations. These are the only failures the engine
/// surfaces to callers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Interest set could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp {
        /// Raw stored value.
        value: String,
        /// Parse failure.
        source: chrono::ParseError,
    },

    /// An unknown role value was read back.
    #[error("invalid role value: {value:?}")]
    InvalidRole {
        /// The unexpected value.
        value: String,
    },

    /// A lock guarding in-memory state was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// Message exceeds [`MAX_CONTENT_SIZE`].
    #[error("content too large: {size} bytes exceeds {max} byte limit")]
    ContentTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// Reject oversized message bodies before they reach storage.
pub(crate) fn check_content_size(text: &str) -> Result<(), StoreError> {
    if text.len() > MAX_CONTENT_SIZE {
        return Err(StoreError::ContentTooLarge {
            size: text.len(),
            max: MAX_CONTENT_SIZE,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Append-only, per-user ordered message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to `user_id`'s log, creating the user if needed.
    ///
    /// Also bumps the owning profile's `last_seen`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails; nothing is recorded then.
    async fn append(
        &self,
        user_id: &str,
        role: Role,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<Message, StoreError>;

    /// The last `limit` messages for `user_id`, oldest first.
    ///
    /// Unknown users yield an empty vector.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Remove every message for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    async fn clear_messages(&self, user_id: &str) -> Result<(), StoreError>;

    /// Counters over `user_id`'s full history.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    async fn stats(&self, user_id: &str) -> Result<ConversationStats, StoreError>;
}

/// Mutable per-user profile record.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile, creating an empty one if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read or lazy insert fails.
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, StoreError>;

    /// Overwrite the display name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn set_name(&self, user_id: &str, name: &str) -> Result<(), StoreError>;

    /// Add an interest category. Returns `true` if it was not present before.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn add_interest(&self, user_id: &str, category: &str) -> Result<bool, StoreError>;

    /// Delete the profile record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    async fn clear_profile(&self, user_id: &str) -> Result<(), StoreError>;
}

/// Combined store used by the synthesis engine.
#[async_trait]
pub trait ConversationStore: MessageStore + ProfileStore {
    /// Atomically remove both the message log and the profile of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails; either both are removed
    /// or neither is.
    async fn clear_user(&self, user_id: &str) -> Result<(), StoreError>;
}
