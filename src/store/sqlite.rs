//! SQLite-backed conversation store.
//!
//! Timestamps are stored as RFC 3339 text. Message order is the
//! autoincrement row id, never the timestamp.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use super::{
    check_content_size, ConversationStats, ConversationStore, Message, MessageStore,
    ProfileStore, Role, StoreError, UserProfile,
};

const SCHEMA: &str = include_str!("../../migrations/001_schema.sql");

type MessageRow = (String, String, String, String, Option<String>);
type ProfileRow = (String, Option<String>, String, String, String);

/// Durable store over a single SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the file cannot be opened or the
    /// schema fails to apply.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        // One writer connection: deferred transactions never race for the lock.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        debug!(path = %path.display(), "opened conversation database");
        Self::from_pool(pool).await
    }

    /// Private in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        // A single, never-recycled connection keeps the in-memory database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying the schema idempotently.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the schema fails to apply.
    pub async fn from_pool(db: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&db).await?;
        Ok(Self { db })
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.db.close().await;
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| StoreError::Timestamp {
            value: value.to_owned(),
            source,
        })
}

fn row_to_message(user_id: &str, row: MessageRow) -> Result<Message, StoreError> {
    let (_, role, content, created_at, session_id) = row;
    Ok(Message {
        user_id: user_id.to_owned(),
        role: Role::parse(&role)?,
        text: content,
        timestamp: parse_ts(&created_at)?,
        session_id,
    })
}

fn row_to_profile(row: ProfileRow) -> Result<UserProfile, StoreError> {
    let (user_id, display_name, interests, first_seen, last_seen) = row;
    let interests: BTreeSet<String> = serde_json::from_str(&interests)?;
    Ok(UserProfile {
        user_id,
        display_name,
        interests,
        first_seen: parse_ts(&first_seen)?,
        last_seen: parse_ts(&last_seen)?,
    })
}

/// Insert an empty profile if none exists yet.
async fn ensure_profile(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    now: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT OR IGNORE INTO user_profiles (user_id, interests, first_seen, last_seen)
         VALUES (?1, '[]', ?2, ?2)",
    )
    .bind(user_id)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn fetch_profile(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
) -> Result<UserProfile, StoreError> {
    let row: ProfileRow = sqlx::query_as(
        "SELECT user_id, display_name, interests, first_seen, last_seen
         FROM user_profiles WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;
    row_to_profile(row)
}

// ---------------------------------------------------------------------------
// Trait impls
// ---------------------------------------------------------------------------

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(
        &self,
        user_id: &str,
        role: Role,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<Message, StoreError> {
        check_content_size(text)?;
        let mut tx = self.db.begin().await?;

        let last: Option<(String,)> = sqlx::query_as(
            "SELECT created_at FROM conversations WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let now = Utc::now();
        let timestamp = match last {
            Some((prev,)) => parse_ts(&prev)?.max(now),
            None => now,
        };
        let stamp = format_ts(timestamp);

        sqlx::query(
            "INSERT INTO conversations (user_id, role, content, session_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(text)
        .bind(session_id)
        .bind(&stamp)
        .execute(&mut *tx)
        .await?;

        ensure_profile(&mut tx, user_id, &stamp).await?;
        sqlx::query("UPDATE user_profiles SET last_seen = ?2 WHERE user_id = ?1")
            .bind(user_id)
            .bind(&stamp)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        // Re-parse so the returned value matches what a later read produces.
        Ok(Message {
            user_id: user_id.to_owned(),
            role,
            text: text.to_owned(),
            timestamp: parse_ts(&stamp)?,
            session_id: session_id.map(str::to_owned),
        })
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT user_id, role, content, created_at, session_id
             FROM conversations WHERE user_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.reverse();

        rows.into_iter()
            .map(|row| row_to_message(user_id, row))
            .collect()
    }

    async fn clear_messages(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conversations WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn stats(&self, user_id: &str) -> Result<ConversationStats, StoreError> {
        let (count, first): (i64, Option<String>) = sqlx::query_as(
            "SELECT count(*), (SELECT created_at FROM conversations WHERE user_id = ?1 ORDER BY id LIMIT 1)
             FROM conversations WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(ConversationStats {
            total_messages: u64::try_from(count).unwrap_or(0),
            first_message_at: first.as_deref().map(parse_ts).transpose()?,
            has_history: count > 0,
        })
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        let mut tx = self.db.begin().await?;
        ensure_profile(&mut tx, user_id, &format_ts(Utc::now())).await?;
        let profile = fetch_profile(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(profile)
    }

    async fn set_name(&self, user_id: &str, name: &str) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        ensure_profile(&mut tx, user_id, &format_ts(Utc::now())).await?;
        sqlx::query("UPDATE user_profiles SET display_name = ?2 WHERE user_id = ?1")
            .bind(user_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_interest(&self, user_id: &str, category: &str) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;
        ensure_profile(&mut tx, user_id, &format_ts(Utc::now())).await?;
        let mut profile = fetch_profile(&mut tx, user_id).await?;

        let inserted = profile.interests.insert(category.to_owned());
        if inserted {
            let encoded = serde_json::to_string(&profile.interests)?;
            sqlx::query("UPDATE user_profiles SET interests = ?2 WHERE user_id = ?1")
                .bind(user_id)
                .bind(encoded)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn clear_profile(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM user_profiles WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn clear_user(&self, user_id: &str) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM conversations WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_profiles WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
