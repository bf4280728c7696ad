//! Persistent store interface.
//!
//! The engine talks to a row-oriented store holding three tables: `sessions`
//! (unique on `(ip, user_agent)`), append-only `requests`, and
//! `honey_tokens` (unique on `token_value`). [`PostgresStore`] is the
//! production driver; [`MemoryStore`] backs tests and degraded operation
//! without a store endpoint.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::request::ApiKeyStatus;
use crate::session::{Session, SessionDiff};
use crate::tokens::HoneyToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Store-layer failures. All of them are contained by the analyzer; none
/// reach the dispatcher.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("store operation exceeded the analysis deadline")]
    DeadlineExceeded,
}

/// One analyzed request, appended exactly once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub method: String,
    pub path: String,
    pub query_params: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Sanitized headers (cookie family removed).
    pub headers: BTreeMap<String, String>,
    pub response_status: u16,
    pub response_time_ms: u64,
    pub api_key_status: ApiKeyStatus,
    pub api_key_used: Option<String>,
    pub sql_injection_detected: bool,
    pub bot_user_agent_detected: bool,
    pub technique_id: String,
    /// Composed label: `<api_key_status>-api-key-<classification>`.
    pub vulnerability_type: String,
}

/// Row-oriented store operations the engine depends on.
#[async_trait]
pub trait DetectionStore: Send + Sync {
    /// Return the active session for `(ip, user_agent)` or create a fresh
    /// one. Race-safe: concurrent creations for the same key converge to a
    /// single stored session.
    async fn get_or_create_session(
        &self,
        ip: &str,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError>;

    /// Merge an analysis diff into a session: set union for the collection
    /// fields, OR for the latching flags, max for the score, overwrite for
    /// the scalars.
    async fn update_session(&self, id: Uuid, diff: &SessionDiff) -> Result<(), StoreError>;

    /// Append one request record.
    async fn append_request(&self, record: &RequestRecord) -> Result<(), StoreError>;

    /// Load the full honey-token catalogue.
    async fn load_tokens(&self) -> Result<Vec<HoneyToken>, StoreError>;

    /// Insert catalogue entries, skipping values that already exist.
    async fn seed_tokens(&self, tokens: &[HoneyToken]) -> Result<(), StoreError>;

    /// One-shot trigger transition. Returns true when this call won the
    /// attribution (the token was untriggered), false when someone else
    /// already had.
    async fn mark_token_triggered(
        &self,
        token_value: &str,
        at: DateTime<Utc>,
        ip: &str,
        session_id: Uuid,
    ) -> Result<bool, StoreError>;
}
