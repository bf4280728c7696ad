//! Postgres store driver.
//!
//! Expected schema (managed by the platform, not by this crate):
//! `sessions` with a unique index on `(ip, user_agent)`, text[] columns for
//! the set fields and double-precision columns for the interval stats;
//! `requests` append-only with jsonb `query_params`/`body`/`headers`;
//! `honey_tokens` with unique `token_value`.
//!
//! All merge semantics are pushed into SQL (`ON CONFLICT`, `GREATEST`,
//! array union, boolean OR) so concurrent analyses never lose a set element,
//! unlatch a flag, or decrease the score. A moka cache keyed `(ip, ua)` with
//! a time-to-idle equal to the session timeout fronts the `sessions` table;
//! every update refreshes it from the authoritative `RETURNING` row.

use super::{DetectionStore, RequestRecord, StoreError};
use crate::score::Classification;
use crate::session::{IntervalStats, Session, SessionDiff};
use crate::tokens::{HoneyToken, TokenType};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use moka::future::Cache;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, ip, user_agent, start_time, last_activity, end_time, \
     interval_samples, interval_mean_ms, interval_m2, request_count, \
     endpoints_called, methods_used, looked_at_docs, tried_openapi, \
     tried_admin, tried_internal, systematic_probing, \
     sql_injection_attempted, used_honey_token, agent_likeness_score, \
     classification, classification_reasons";

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    ip: String,
    user_agent: String,
    start_time: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    interval_samples: i64,
    interval_mean_ms: f64,
    interval_m2: f64,
    request_count: i64,
    endpoints_called: Vec<String>,
    methods_used: Vec<String>,
    looked_at_docs: bool,
    tried_openapi: bool,
    tried_admin: bool,
    tried_internal: bool,
    systematic_probing: bool,
    sql_injection_attempted: bool,
    used_honey_token: bool,
    agent_likeness_score: i32,
    classification: String,
    classification_reasons: Vec<String>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            ip: row.ip,
            user_agent: row.user_agent,
            start_time: row.start_time,
            last_activity: row.last_activity,
            end_time: row.end_time,
            intervals: IntervalStats::from_parts(
                row.interval_samples,
                row.interval_mean_ms,
                row.interval_m2,
            ),
            request_count: row.request_count,
            endpoints_called: row.endpoints_called.into_iter().collect(),
            methods_used: row.methods_used.into_iter().collect(),
            looked_at_docs: row.looked_at_docs,
            tried_openapi: row.tried_openapi,
            tried_admin: row.tried_admin,
            tried_internal: row.tried_internal,
            systematic_probing: row.systematic_probing,
            sql_injection_attempted: row.sql_injection_attempted,
            used_honey_token: row.used_honey_token,
            agent_likeness_score: row.agent_likeness_score.clamp(0, 100) as u8,
            classification: Classification::parse(&row.classification),
            classification_reasons: row.classification_reasons.into_iter().collect(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    token_type: String,
    token_value: String,
    triggered: bool,
    triggered_at: Option<DateTime<Utc>>,
    triggered_by_ip: Option<String>,
    triggered_by_session: Option<Uuid>,
}

/// Postgres-backed [`DetectionStore`].
pub struct PostgresStore {
    pool: PgPool,
    session_timeout: Duration,
    lookup: Cache<(String, String), Session>,
}

impl PostgresStore {
    /// Connect with a bounded pool.
    pub async fn connect(
        url: &str,
        session_timeout: Duration,
        max_connections: u32,
        cache_capacity: u64,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool, session_timeout, cache_capacity))
    }

    pub fn new(pool: PgPool, session_timeout: Duration, cache_capacity: u64) -> Self {
        let idle = session_timeout
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(600));
        let lookup = Cache::builder()
            .max_capacity(cache_capacity)
            .time_to_idle(idle)
            .build();
        Self {
            pool,
            session_timeout,
            lookup,
        }
    }

    async fn select_active(
        &self,
        ip: &str,
        user_agent: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE ip = $1 AND user_agent = $2 AND last_activity > $3"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(ip)
            .bind(user_agent)
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Session::from))
    }
}

#[async_trait]
impl DetectionStore for PostgresStore {
    async fn get_or_create_session(
        &self,
        ip: &str,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let key = (ip.to_string(), user_agent.to_string());
        let cutoff = now - self.session_timeout;

        if let Some(cached) = self.lookup.get(&key).await {
            if cached.is_active(now, self.session_timeout) {
                return Ok(cached);
            }
            self.lookup.invalidate(&key).await;
        }

        if let Some(session) = self.select_active(ip, user_agent, cutoff).await? {
            self.lookup.insert(key, session.clone()).await;
            return Ok(session);
        }

        // No active row: create one, superseding an expired row for the same
        // key in place. The conditional upsert makes concurrent creations
        // converge; when we lose the race the fresh row is discarded and the
        // winner is re-read.
        let fresh = Session::fresh(ip, user_agent, now);
        let created: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO sessions (
                id, ip, user_agent, start_time, last_activity, end_time,
                interval_samples, interval_mean_ms, interval_m2,
                request_count, endpoints_called, methods_used,
                looked_at_docs, tried_openapi, tried_admin, tried_internal,
                systematic_probing, sql_injection_attempted, used_honey_token,
                agent_likeness_score, classification, classification_reasons
            ) VALUES (
                $1, $2, $3, $4, $4, NULL,
                0, 0, 0,
                0, '{}', '{}',
                FALSE, FALSE, FALSE, FALSE,
                FALSE, FALSE, FALSE,
                0, 'unknown', '{}'
            )
            ON CONFLICT (ip, user_agent) DO UPDATE SET
                id = EXCLUDED.id,
                start_time = EXCLUDED.start_time,
                last_activity = EXCLUDED.last_activity,
                end_time = NULL,
                interval_samples = 0,
                interval_mean_ms = 0,
                interval_m2 = 0,
                request_count = 0,
                endpoints_called = '{}',
                methods_used = '{}',
                looked_at_docs = FALSE,
                tried_openapi = FALSE,
                tried_admin = FALSE,
                tried_internal = FALSE,
                systematic_probing = FALSE,
                sql_injection_attempted = FALSE,
                used_honey_token = FALSE,
                agent_likeness_score = 0,
                classification = 'unknown',
                classification_reasons = '{}'
            WHERE sessions.last_activity <= $5
            RETURNING id
            "#,
        )
        .bind(fresh.id)
        .bind(ip)
        .bind(user_agent)
        .bind(now)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        if created.is_some() {
            self.lookup
                .insert((ip.to_string(), user_agent.to_string()), fresh.clone())
                .await;
            return Ok(fresh);
        }

        // Lost the race against a concurrent creation that is still active.
        match self.select_active(ip, user_agent, cutoff).await? {
            Some(session) => {
                self.lookup
                    .insert((ip.to_string(), user_agent.to_string()), session.clone())
                    .await;
                Ok(session)
            }
            None => Err(StoreError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn update_session(&self, id: Uuid, diff: &SessionDiff) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE sessions SET
                request_count = $2,
                last_activity = $3,
                interval_samples = $4,
                interval_mean_ms = $5,
                interval_m2 = $6,
                endpoints_called =
                    ARRAY(SELECT DISTINCT e FROM unnest(endpoints_called || $7) AS e),
                methods_used =
                    ARRAY(SELECT DISTINCT m FROM unnest(methods_used || $8) AS m),
                classification_reasons =
                    ARRAY(SELECT DISTINCT r FROM unnest(classification_reasons || $9) AS r),
                agent_likeness_score = GREATEST(agent_likeness_score, $10),
                classification = $11,
                looked_at_docs = looked_at_docs OR $12,
                tried_openapi = tried_openapi OR $13,
                tried_admin = tried_admin OR $14,
                tried_internal = tried_internal OR $15,
                sql_injection_attempted = sql_injection_attempted OR $16,
                used_honey_token = used_honey_token OR $17,
                systematic_probing = cardinality(
                    ARRAY(SELECT DISTINCT e FROM unnest(endpoints_called || $7) AS e)
                ) > 5
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .bind(diff.request_count)
            .bind(diff.last_activity)
            .bind(diff.intervals.samples)
            .bind(diff.intervals.raw_mean_ms())
            .bind(diff.intervals.raw_m2())
            .bind(vec![diff.endpoint.clone()])
            .bind(vec![diff.method.clone()])
            .bind(diff.new_reasons.clone())
            .bind(diff.score as i32)
            .bind(diff.classification.as_str())
            .bind(diff.looked_at_docs)
            .bind(diff.tried_openapi)
            .bind(diff.tried_admin)
            .bind(diff.tried_internal)
            .bind(diff.sql_injection_attempted)
            .bind(diff.used_honey_token)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let session = Session::from(row);
                self.lookup
                    .insert(
                        (session.ip.clone(), session.user_agent.clone()),
                        session,
                    )
                    .await;
                Ok(())
            }
            None => Err(StoreError::SessionNotFound(id)),
        }
    }

    async fn append_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO requests (
                session_id, timestamp, ip, user_agent, method, path,
                query_params, body, headers, response_status, response_time_ms,
                api_key_status, api_key_used, sql_injection_detected,
                bot_user_agent_detected, technique_id, vulnerability_type
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17
            )
            "#,
        )
        .bind(record.session_id)
        .bind(record.timestamp)
        .bind(&record.ip)
        .bind(&record.user_agent)
        .bind(&record.method)
        .bind(&record.path)
        .bind(Json(&record.query_params))
        .bind(record.body.clone())
        .bind(Json(&record.headers))
        .bind(record.response_status as i16)
        .bind(record.response_time_ms as i64)
        .bind(record.api_key_status.as_str())
        .bind(record.api_key_used.as_deref())
        .bind(record.sql_injection_detected)
        .bind(record.bot_user_agent_detected)
        .bind(&record.technique_id)
        .bind(&record.vulnerability_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_tokens(&self) -> Result<Vec<HoneyToken>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT token_type, token_value, triggered, triggered_at, \
             triggered_by_ip, triggered_by_session FROM honey_tokens",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let token_type = TokenType::parse(&row.token_type)?;
                Some(HoneyToken {
                    token_type,
                    token_value: row.token_value,
                    triggered: row.triggered,
                    triggered_at: row.triggered_at,
                    triggered_by_ip: row.triggered_by_ip,
                    triggered_by_session: row.triggered_by_session,
                })
            })
            .collect())
    }

    async fn seed_tokens(&self, tokens: &[HoneyToken]) -> Result<(), StoreError> {
        for token in tokens {
            sqlx::query(
                r#"
                INSERT INTO honey_tokens (token_type, token_value, triggered)
                VALUES ($1, $2, FALSE)
                ON CONFLICT (token_value) DO NOTHING
                "#,
            )
            .bind(token.token_type.as_str())
            .bind(&token.token_value)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn mark_token_triggered(
        &self,
        token_value: &str,
        at: DateTime<Utc>,
        ip: &str,
        session_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE honey_tokens SET
                triggered = TRUE,
                triggered_at = $2,
                triggered_by_ip = $3,
                triggered_by_session = $4
            WHERE token_value = $1 AND triggered = FALSE
            "#,
        )
        .bind(token_value)
        .bind(at)
        .bind(ip)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_row_conversion_rebuilds_sets_and_stats() {
        let row = SessionRow {
            id: Uuid::new_v4(),
            ip: "1.2.3.4".to_string(),
            user_agent: "curl/8.0".to_string(),
            start_time: Utc::now(),
            last_activity: Utc::now(),
            end_time: None,
            interval_samples: 6,
            interval_mean_ms: 500.0,
            interval_m2: 12.5,
            request_count: 7,
            endpoints_called: vec!["/a".into(), "/b".into(), "/a".into()],
            methods_used: vec!["GET".into(), "POST".into()],
            looked_at_docs: true,
            tried_openapi: false,
            tried_admin: true,
            tried_internal: false,
            systematic_probing: false,
            sql_injection_attempted: false,
            used_honey_token: false,
            agent_likeness_score: 50,
            classification: "scraper".to_string(),
            classification_reasons: vec!["docs_first".into(), "admin_probing".into()],
        };

        let session = Session::from(row);
        assert_eq!(session.endpoints_called.len(), 2);
        assert_eq!(session.methods_used.len(), 2);
        assert_eq!(session.agent_likeness_score, 50);
        assert_eq!(session.classification, Classification::Scraper);
        assert_eq!(session.intervals.samples, 6);
        assert!((session.intervals.raw_mean_ms() - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_classification_strings_degrade_to_unknown() {
        assert_eq!(Classification::parse("ai_agent"), Classification::AiAgent);
        assert_eq!(Classification::parse("gremlin"), Classification::Unknown);
    }

    #[test]
    fn out_of_range_stored_scores_are_clamped() {
        let row = SessionRow {
            id: Uuid::new_v4(),
            ip: "1.2.3.4".to_string(),
            user_agent: "curl/8.0".to_string(),
            start_time: Utc::now(),
            last_activity: Utc::now(),
            end_time: None,
            interval_samples: 0,
            interval_mean_ms: 0.0,
            interval_m2: 0.0,
            request_count: 1,
            endpoints_called: vec![],
            methods_used: vec![],
            looked_at_docs: false,
            tried_openapi: false,
            tried_admin: false,
            tried_internal: false,
            systematic_probing: false,
            sql_injection_attempted: false,
            used_honey_token: false,
            agent_likeness_score: 150,
            classification: "ai_agent".to_string(),
            classification_reasons: vec![],
        };
        assert_eq!(Session::from(row).agent_likeness_score, 100);
    }
}
