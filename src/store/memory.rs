//! In-memory conversation store.
//!
//! Everything lives in two maps behind one [`Mutex`], so a clear of both the
//! log and the profile is trivially atomic. Data is lost on process exit.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    check_content_size, ConversationStats, ConversationStore, Message, MessageStore,
    ProfileStore, Role, StoreError, UserProfile,
};

#[derive(Debug, Default)]
struct Inner {
    messages: HashMap<String, Vec<Message>>,
    profiles: HashMap<String, UserProfile>,
}

impl Inner {
    fn profile_mut(&mut self, user_id: &str) -> &mut UserProfile {
        self.profiles
            .entry(user_id.to_owned())
            .or_insert_with(|| UserProfile::new(user_id, Utc::now()))
    }
}

/// Process-lifetime store backed by hash maps.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append(
        &self,
        user_id: &str,
        role: Role,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<Message, StoreError> {
        check_content_size(text)?;
        let mut inner = self.lock()?;

        let log = inner.messages.entry(user_id.to_owned()).or_default();
        // Clamp against the previous entry so the log never goes backwards in time.
        let now = Utc::now();
        let timestamp = log.last().map_or(now, |last| last.timestamp.max(now));

        let message = Message {
            user_id: user_id.to_owned(),
            role,
            text: text.to_owned(),
            timestamp,
            session_id: session_id.map(str::to_owned),
        };
        log.push(message.clone());

        inner
            .profiles
            .entry(user_id.to_owned())
            .or_insert_with(|| UserProfile::new(user_id, timestamp))
            .last_seen = timestamp;
        Ok(message)
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let inner = self.lock()?;
        let Some(log) = inner.messages.get(user_id) else {
            return Ok(Vec::new());
        };
        let start = log.len().saturating_sub(limit);
        Ok(log.get(start..).map(<[Message]>::to_vec).unwrap_or_default())
    }

    async fn clear_messages(&self, user_id: &str) -> Result<(), StoreError> {
        self.lock()?.messages.remove(user_id);
        Ok(())
    }

    async fn stats(&self, user_id: &str) -> Result<ConversationStats, StoreError> {
        let inner = self.lock()?;
        let log = inner.messages.get(user_id);
        let total = log.map_or(0, Vec::len);
        Ok(ConversationStats {
            total_messages: u64::try_from(total).unwrap_or(u64::MAX),
            first_message_at: log.and_then(|l| l.first()).map(|m| m.timestamp),
            has_history: total > 0,
        })
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        Ok(self.lock()?.profile_mut(user_id).clone())
    }

    async fn set_name(&self, user_id: &str, name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.profile_mut(user_id).display_name = Some(name.to_owned());
        Ok(())
    }

    async fn add_interest(&self, user_id: &str, category: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner
            .profile_mut(user_id)
            .interests
            .insert(category.to_owned()))
    }

    async fn clear_profile(&self, user_id: &str) -> Result<(), StoreError> {
        self.lock()?.profiles.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn clear_user(&self, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.messages.remove(user_id);
        inner.profiles.remove(user_id);
        Ok(())
    }
}
