//! Analysis orchestration.
//!
//! [`HoneypotAnalyzer::analyze`] runs the full pipeline for one request:
//! normalize, stitch into a session, run the detectors and the honey-token
//! registry, score, classify, map the MITRE technique, then persist the
//! session diff and the request record. Every store fault is contained: the
//! analyzer always produces a [`DetectionResult`], falling back to an
//! ephemeral session when the store is unreachable.
//!
//! [`AnalysisQueue`] decouples the honeypot route from all of this: the
//! route submits and returns; analysis happens on a worker task with a
//! bounded drop-oldest backlog.

use crate::config::AgentDetectionConfig;
use crate::detectors::DetectorVerdicts;
use crate::mitre;
use crate::request::{normalize, RawRequest};
use crate::score::{self, Classification};
use crate::session::{Session, SessionDiff};
use crate::store::{DetectionStore, RequestRecord, StoreError};
use crate::tokens::{default_seeds, HoneyToken, HoneyTokenRegistry, TokenCheck};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of analyzing one request. Never surfaced to the honeypot's
/// client; consumed by logs and operators.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub session_id: Uuid,
    pub score: u8,
    pub classification: Classification,
    /// Full reason set for the session, current analysis included.
    pub reasons: Vec<String>,
    pub sql_injection_detected: bool,
    pub bot_user_agent_detected: bool,
    pub honey_token_triggered: bool,
    pub technique_id: String,
}

/// The orchestration entry point.
pub struct HoneypotAnalyzer {
    config: AgentDetectionConfig,
    store: Arc<dyn DetectionStore>,
    tokens: HoneyTokenRegistry,
}

impl HoneypotAnalyzer {
    pub fn new(config: AgentDetectionConfig, store: Arc<dyn DetectionStore>) -> Self {
        let tokens = HoneyTokenRegistry::new(store.clone());
        Self {
            config,
            store,
            tokens,
        }
    }

    /// Seed the built-in honey-token catalogue (bait key included) plus any
    /// operator-provided extras, and load the registry.
    pub async fn seed_tokens(&self) -> Result<usize, StoreError> {
        let mut seeds = default_seeds(&self.config.honeypot.bait_api_key);
        seeds.extend(
            self.config
                .honeypot
                .extra_tokens
                .iter()
                .map(|t| HoneyToken::seed(t.token_type, t.token_value.clone())),
        );
        self.tokens.seed(&seeds).await
    }

    pub fn registry(&self) -> &HoneyTokenRegistry {
        &self.tokens
    }

    /// Analyze one request end to end.
    pub async fn analyze(&self, raw: &RawRequest) -> DetectionResult {
        let now = Utc::now();
        let deadline = Instant::now() + Duration::from_millis(self.config.analysis.deadline_ms);

        let meta = normalize(raw, &self.config.honeypot.bait_api_key);

        // Session stitching. A store fault downgrades to an ephemeral
        // session: detection still runs, nothing is persisted.
        let (session, persisted) = match bounded(
            deadline,
            self.store
                .get_or_create_session(&meta.ip, &meta.user_agent, now),
        )
        .await
        {
            Ok(session) => (session, true),
            Err(err) => {
                warn!(
                    error = %err,
                    ip = %meta.ip,
                    "session lookup failed, analyzing with an ephemeral session"
                );
                (Session::fresh(&meta.ip, &meta.user_agent, now), false)
            }
        };

        // Honey-token registry check. Missing the deadline counts as "not
        // triggered"; the verdict must never block the pipeline.
        let token_check = match timeout_at(deadline, self.tokens.check(&meta, session.id, now))
            .await
        {
            Ok(check) => check,
            Err(_) => {
                warn!("honey token check missed the analysis deadline");
                TokenCheck::default()
            }
        };

        let verdicts =
            DetectorVerdicts::evaluate(&meta).with_honey_token(token_check.token_type);
        debug!(
            sql = verdicts.sql_injection,
            bot_ua = verdicts.bot_user_agent,
            docs = verdicts.docs_path,
            admin = verdicts.admin_path,
            honey_token = verdicts.honey_token_triggered(),
            "detectors evaluated"
        );

        // Fold this request's inter-arrival interval into the running stats.
        let mut intervals = session.intervals;
        if session.request_count > 0 {
            let interval_ms = (now - session.last_activity).num_milliseconds().max(0) as f64;
            intervals.record(interval_ms);
        }

        let outcome = score::evaluate(&session, &meta, &verdicts, &intervals);
        let technique = mitre::map_technique(
            meta.api_key_status,
            verdicts.sql_injection,
            verdicts.honey_token_triggered(),
        );

        let diff = SessionDiff {
            request_count: session.request_count + 1,
            last_activity: now,
            intervals,
            endpoint: meta.path.clone(),
            method: meta.method.clone(),
            new_reasons: outcome.new_reasons.clone(),
            score: outcome.score,
            classification: outcome.classification,
            looked_at_docs: verdicts.docs_path,
            tried_openapi: verdicts.openapi_path,
            tried_admin: verdicts.admin_path,
            tried_internal: verdicts.internal_path,
            sql_injection_attempted: verdicts.sql_injection,
            used_honey_token: verdicts.honey_token_triggered(),
        };

        if persisted {
            if let Err(err) = bounded(deadline, self.store.update_session(session.id, &diff)).await
            {
                warn!(error = %err, session = %session.id, "session diff not persisted");
            }

            let record = RequestRecord {
                session_id: session.id,
                timestamp: now,
                ip: meta.ip.clone(),
                user_agent: meta.user_agent.clone(),
                method: meta.method.clone(),
                path: meta.path.clone(),
                query_params: meta.query_params.clone(),
                body: meta.body.clone(),
                headers: meta.headers.clone(),
                response_status: meta.response_status,
                response_time_ms: meta.response_time_ms,
                api_key_status: meta.api_key_status,
                api_key_used: meta.api_key_used.clone(),
                sql_injection_detected: verdicts.sql_injection,
                bot_user_agent_detected: verdicts.bot_user_agent,
                technique_id: technique.to_string(),
                vulnerability_type: format!(
                    "{}-api-key-{}",
                    meta.api_key_status.as_str(),
                    outcome.classification.as_str()
                ),
            };
            if let Err(err) = bounded(deadline, self.store.append_request(&record)).await {
                warn!(error = %err, session = %session.id, "request record not persisted");
            }
        }

        // Full reason set: the session's prior tags plus this analysis.
        let reasons: Vec<String> = session
            .classification_reasons
            .iter()
            .cloned()
            .chain(outcome.new_reasons.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let session_prefix: String = session.id.simple().to_string().chars().take(8).collect();
        info!(
            session = %session_prefix,
            score = outcome.score,
            classification = outcome.classification.as_str(),
            reasons = %reasons.join(","),
            sql_injection = verdicts.sql_injection,
            honey_token = verdicts.honey_token_triggered(),
            "request analyzed"
        );

        DetectionResult {
            session_id: session.id,
            score: outcome.score,
            classification: outcome.classification,
            reasons,
            sql_injection_detected: verdicts.sql_injection,
            bot_user_agent_detected: verdicts.bot_user_agent,
            honey_token_triggered: verdicts.honey_token_triggered(),
            technique_id: technique.to_string(),
        }
    }
}

/// Run a store step against the analysis deadline.
async fn bounded<T>(
    deadline: Instant,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::DeadlineExceeded),
    }
}

/// Bounded fire-and-forget analysis queue.
///
/// `submit` never blocks and never fails; when the backlog is full the
/// oldest pending request is dropped so a flood cannot grow memory without
/// bound.
#[derive(Clone)]
pub struct AnalysisQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    analyzer: Arc<HoneypotAnalyzer>,
    pending: Mutex<VecDeque<RawRequest>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    processed: AtomicU64,
}

impl AnalysisQueue {
    /// Spawn the worker task and return the queue handle.
    pub fn start(analyzer: Arc<HoneypotAnalyzer>, capacity: usize) -> Self {
        let inner = Arc::new(QueueInner {
            analyzer,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            processed: AtomicU64::new(0),
        });

        let worker = Arc::clone(&inner);
        tokio::spawn(async move { worker.run().await });

        Self { inner }
    }

    /// Enqueue one request for analysis. Drop-oldest on overflow.
    pub fn submit(&self, raw: RawRequest) {
        let overflowed = {
            let mut pending = self.inner.pending.lock().expect("analysis queue lock");
            pending.push_back(raw);
            if pending.len() > self.inner.capacity {
                pending.pop_front();
                true
            } else {
                false
            }
        };
        if overflowed {
            let total = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped_total = total, "analysis backlog full, dropped oldest request");
        }
        self.inner.notify.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.lock().expect("analysis queue lock").len()
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }
}

impl QueueInner {
    async fn run(&self) {
        loop {
            let next = self
                .pending
                .lock()
                .expect("analysis queue lock")
                .pop_front();
            match next {
                Some(raw) => {
                    self.analyzer.analyze(&raw).await;
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
                None => self.notify.notified().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use crate::session::Session as StoredSession;

    fn make_raw(method: &str, path: &str, ua: &str, ip: &str) -> RawRequest {
        RawRequest {
            method: method.to_string(),
            path: path.to_string(),
            query_string: None,
            headers: vec![
                ("User-Agent".to_string(), ua.to_string()),
                ("X-Forwarded-For".to_string(), ip.to_string()),
            ],
            body: None,
            peer_ip: Some("127.0.0.1".to_string()),
            response_status: 401,
            response_time_ms: 2,
        }
    }

    async fn make_analyzer() -> (Arc<MemoryStore>, HoneypotAnalyzer) {
        let config = AgentDetectionConfig::default();
        let store = Arc::new(MemoryStore::new(config.session.timeout()));
        let analyzer = HoneypotAnalyzer::new(config, store.clone());
        analyzer.seed_tokens().await.unwrap();
        (store, analyzer)
    }

    #[tokio::test]
    async fn cold_docs_probe_is_scored_and_persisted() {
        let (store, analyzer) = make_analyzer().await;
        let result = analyzer
            .analyze(&make_raw("GET", "/api/docs", "curl/8.0", "1.2.3.4"))
            .await;

        assert_eq!(result.score, 35);
        assert_eq!(result.classification, Classification::Human);
        assert_eq!(result.technique_id, "T1190");
        assert!(result.bot_user_agent_detected);
        assert!(!result.sql_injection_detected);

        let session = store.session_for("1.2.3.4", "curl/8.0").unwrap();
        assert_eq!(session.id, result.session_id);
        assert_eq!(session.request_count, 1);
        assert!(session.looked_at_docs);
        assert!(session.classification_reasons.contains("docs_first"));

        let log = store.request_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].vulnerability_type, "none-api-key-human");
    }

    struct FailingStore;

    #[async_trait]
    impl DetectionStore for FailingStore {
        async fn get_or_create_session(
            &self,
            _ip: &str,
            _user_agent: &str,
            _now: DateTime<Utc>,
        ) -> Result<StoredSession, StoreError> {
            Err(StoreError::Database(sqlx::Error::RowNotFound))
        }

        async fn update_session(
            &self,
            id: Uuid,
            _diff: &SessionDiff,
        ) -> Result<(), StoreError> {
            Err(StoreError::SessionNotFound(id))
        }

        async fn append_request(&self, _record: &RequestRecord) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::RowNotFound))
        }

        async fn load_tokens(&self) -> Result<Vec<HoneyToken>, StoreError> {
            Ok(vec![])
        }

        async fn seed_tokens(&self, _tokens: &[HoneyToken]) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::RowNotFound))
        }

        async fn mark_token_triggered(
            &self,
            _token_value: &str,
            _at: DateTime<Utc>,
            _ip: &str,
            _session_id: Uuid,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::RowNotFound))
        }
    }

    #[tokio::test]
    async fn store_failure_still_yields_a_result() {
        let analyzer =
            HoneypotAnalyzer::new(AgentDetectionConfig::default(), Arc::new(FailingStore));
        let result = analyzer
            .analyze(&make_raw("GET", "/api/admin/x", "curl/8.0", "1.2.3.4"))
            .await;

        // Detection ran against an ephemeral session.
        assert_eq!(result.score, 30);
        assert!(result.reasons.contains(&"admin_probing".to_string()));
        assert!(result.reasons.contains(&"bot_user_agent".to_string()));
        assert_eq!(result.technique_id, "T1190");
    }

    #[tokio::test]
    async fn queue_drops_oldest_on_overflow() {
        let (_store, analyzer) = make_analyzer().await;
        let queue = AnalysisQueue::start(Arc::new(analyzer), 2);

        // The worker task has not been polled yet on the current-thread
        // runtime, so these submissions pile up synchronously.
        for i in 0..3 {
            queue.submit(make_raw("GET", &format!("/api/e{i}"), "curl/8.0", "9.9.9.9"));
        }
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.dropped(), 1);

        // Let the worker drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.processed(), 2);
    }
}
