//! Session persistence adapter (C8): debounced save, explicit save,
//! load-by-id, create, remix, and format-version normalization.
//!
//! Grounded on the teacher's `storage::StorageBackend` trait (async,
//! object-safe, in-memory + real-backend implementations) and its
//! `db::presets::PresetRepository` query shape.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyboardia_core::session::CURRENT_SESSION_VERSION;
use keyboardia_core::Session;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::PersistenceError;

/// A persisted session row (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub remixed_from: Option<String>,
    pub remix_count: i32,
    pub state: Session,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<SessionRecord>, PersistenceError>;
    async fn save(&self, record: &SessionRecord) -> Result<(), PersistenceError>;
    async fn create(&self, id: &str, name: Option<String>, state: Session) -> Result<SessionRecord, PersistenceError>;
    async fn remix(&self, source_id: &str, new_id: &str) -> Result<SessionRecord, PersistenceError>;
}

/// Upgrades an older persisted layout to the current one: historical 16- or
/// 64-slot step arrays, and short/legacy `parameter_locks` arrays, are
/// resized to 128 by `Track`'s own deserializer (`session::steps_serde`,
/// `session::parameter_locks_serde`); this pass just bumps the version tag
/// once that resize has happened, so repeated loads are idempotent.
pub fn normalize(mut state: Session) -> Session {
    if state.version < CURRENT_SESSION_VERSION {
        state.version = CURRENT_SESSION_VERSION;
    }
    state
}

/// In-memory session store: mirrors the teacher's `InMemoryStorage`, used
/// in tests and anywhere a database is unavailable.
#[derive(Default)]
pub struct InMemorySessionStore {
    records: StdMutex<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        let mut records = self.records.lock().unwrap();
        let mut record = record.clone();
        record.updated_at = Utc::now();
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn create(&self, id: &str, name: Option<String>, state: Session) -> Result<SessionRecord, PersistenceError> {
        let now = Utc::now();
        let record = SessionRecord {
            id: id.to_string(),
            name,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            remixed_from: None,
            remix_count: 0,
            state: normalize(state),
        };
        self.records.lock().unwrap().insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn remix(&self, source_id: &str, new_id: &str) -> Result<SessionRecord, PersistenceError> {
        let mut records = self.records.lock().unwrap();
        let source = records.get(source_id).cloned().ok_or(PersistenceError::NotFound)?;
        let now = Utc::now();
        let remix = SessionRecord {
            id: new_id.to_string(),
            name: source.name.clone(),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            remixed_from: Some(source_id.to_string()),
            remix_count: 0,
            state: source.state.clone(),
        };
        if let Some(src) = records.get_mut(source_id) {
            src.remix_count += 1;
        }
        records.insert(remix.id.clone(), remix.clone());
        Ok(remix)
    }
}

/// Postgres-backed session store, mirroring the teacher's
/// `PresetRepository` query style: parameterized queries, `sqlx::Error`
/// propagation via `#[from]`. Uses the runtime-checked `query_as` form
/// rather than the compile-time `query_as!` macro so this crate builds
/// without a live `DATABASE_URL`.
pub struct PostgresSessionStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    remixed_from: Option<String>,
    remix_count: i32,
    state: serde_json::Value,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        PostgresSessionStore { pool }
    }
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = PersistenceError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let state: Session = serde_json::from_value(row.state)?;
        Ok(SessionRecord {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_accessed_at: row.last_accessed_at,
            remixed_from: row.remixed_from,
            remix_count: row.remix_count,
            state: normalize(state),
        })
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, name, created_at, updated_at, last_accessed_at, remixed_from, remix_count, state
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRecord::try_from).transpose()
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        let state = serde_json::to_value(&record.state)?;
        sqlx::query(
            r#"
            UPDATE sessions
            SET name = $2, state = $3, updated_at = now(), last_accessed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create(&self, id: &str, name: Option<String>, state: Session) -> Result<SessionRecord, PersistenceError> {
        let state = normalize(state);
        let state_json = serde_json::to_value(&state)?;
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions (id, name, state, remix_count)
            VALUES ($1, $2, $3, 0)
            RETURNING id, name, created_at, updated_at, last_accessed_at, remixed_from, remix_count, state
            "#,
        )
        .bind(id)
        .bind(&name)
        .bind(state_json)
        .fetch_one(&self.pool)
        .await?;

        SessionRecord::try_from(row)
    }

    async fn remix(&self, source_id: &str, new_id: &str) -> Result<SessionRecord, PersistenceError> {
        let source = self.load(source_id).await?.ok_or(PersistenceError::NotFound)?;
        let state_json = serde_json::to_value(&source.state)?;
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions (id, name, state, remixed_from, remix_count)
            VALUES ($1, $2, $3, $4, 0)
            RETURNING id, name, created_at, updated_at, last_accessed_at, remixed_from, remix_count, state
            "#,
        )
        .bind(new_id)
        .bind(&source.name)
        .bind(state_json)
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query("UPDATE sessions SET remix_count = remix_count + 1 WHERE id = $1")
            .bind(source_id)
            .execute(&self.pool)
            .await?;

        SessionRecord::try_from(row)
    }
}

/// Debounce policy for C8's "2 s after last mutation; max 15 s" save
/// schedule, plus the byte-identity skip. The policy itself (`should_save`)
/// is pure and tested directly; `save_if_changed` is the thin async
/// wrapper that actually calls the store.
pub struct SaveDebouncer {
    store: std::sync::Arc<dyn SessionStore>,
    debounce: Duration,
    max_delay: Duration,
}

impl SaveDebouncer {
    pub fn new(store: std::sync::Arc<dyn SessionStore>, debounce: Duration, max_delay: Duration) -> Self {
        SaveDebouncer { store, debounce, max_delay }
    }

    /// `true` iff enough quiet time has passed since the last dirtying
    /// mutation, or the max delay since the last save has been reached
    /// (so a session under continuous editing still saves periodically).
    pub fn should_save(&self, last_dirty_at: Instant, last_saved_at: Option<Instant>, now: Instant) -> bool {
        now.duration_since(last_dirty_at) >= self.debounce
            || last_saved_at.map_or(false, |t| now.duration_since(t) >= self.max_delay)
    }

    /// Saves `record` unless its serialized `state` is byte-identical to
    /// `last_payload`. Returns whether a save actually happened.
    pub async fn save_if_changed(
        &self,
        record: &SessionRecord,
        last_payload: &mut Option<String>,
    ) -> Result<bool, PersistenceError> {
        let payload = serde_json::to_string(&record.state)?;
        if last_payload.as_deref() == Some(payload.as_str()) {
            return Ok(false);
        }
        self.store.save(record).await?;
        *last_payload = Some(payload);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyboardia_core::session::Track;

    #[tokio::test]
    async fn in_memory_store_round_trips_create_and_load() {
        let store = InMemorySessionStore::new();
        let state = Session::default();
        let created = store.create("s1", Some("My Session".into()), state.clone()).await.unwrap();
        assert_eq!(created.id, "s1");

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.state, state);
        assert_eq!(loaded.name.as_deref(), Some("My Session"));
    }

    #[tokio::test]
    async fn remix_copies_state_and_bumps_source_remix_count() {
        let store = InMemorySessionStore::new();
        let mut state = Session::default();
        state.tracks.push(Track::new("t1", "Kick", "808kick"));
        store.create("source", None, state.clone()).await.unwrap();

        let remix = store.remix("source", "remix-1").await.unwrap();
        assert_eq!(remix.remixed_from.as_deref(), Some("source"));
        assert_eq!(remix.state, state);

        let source = store.load("source").await.unwrap().unwrap();
        assert_eq!(source.remix_count, 1);
    }

    #[tokio::test]
    async fn remix_of_unknown_source_is_not_found() {
        let store = InMemorySessionStore::new();
        let err = store.remix("does-not-exist", "remix-1").await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound));
    }

    #[test]
    fn should_save_fires_after_debounce_quiet_period() {
        let debouncer = SaveDebouncer::new(
            std::sync::Arc::new(InMemorySessionStore::new()),
            Duration::from_secs(2),
            Duration::from_secs(15),
        );
        let dirty_at = Instant::now() - Duration::from_secs(3);
        assert!(debouncer.should_save(dirty_at, None, Instant::now()));
    }

    #[test]
    fn should_save_fires_at_max_delay_under_continuous_edits() {
        let debouncer = SaveDebouncer::new(
            std::sync::Arc::new(InMemorySessionStore::new()),
            Duration::from_secs(2),
            Duration::from_secs(15),
        );
        let now = Instant::now();
        let dirty_at = now; // still dirtying, debounce quiet period never elapses
        let last_saved = now - Duration::from_secs(16);
        assert!(debouncer.should_save(dirty_at, Some(last_saved), now));
    }

    #[test]
    fn should_save_is_false_mid_debounce_with_a_recent_save() {
        let debouncer = SaveDebouncer::new(
            std::sync::Arc::new(InMemorySessionStore::new()),
            Duration::from_secs(2),
            Duration::from_secs(15),
        );
        let now = Instant::now();
        assert!(!debouncer.should_save(now, Some(now), now));
    }

    #[tokio::test]
    async fn save_if_changed_skips_byte_identical_payloads() {
        let store = std::sync::Arc::new(InMemorySessionStore::new());
        let debouncer = SaveDebouncer::new(store.clone(), Duration::from_secs(2), Duration::from_secs(15));
        let record = store.create("s1", None, Session::default()).await.unwrap();

        let mut last_payload = None;
        assert!(debouncer.save_if_changed(&record, &mut last_payload).await.unwrap());
        assert!(!debouncer.save_if_changed(&record, &mut last_payload).await.unwrap());
    }

    #[test]
    fn normalize_bumps_stale_version_numbers() {
        let mut state = Session::default();
        state.version = 1;
        let normalized = normalize(state);
        assert_eq!(normalized.version, CURRENT_SESSION_VERSION);
    }
}
