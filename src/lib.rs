//! Agent-likeness detection engine for the Hivetrap honeypot
//!
//! Classifies every visitor hitting the honeypot's wildcard surface as
//! `human`, `scraper`, or `ai_agent` and persists the evidence trail.
//!
//! # Features
//!
//! - Behavioral sessions keyed by `(ip, user_agent)` with a sliding timeout
//! - Content detectors (SQL injection, bot User-Agents, path taxonomies)
//! - Honey token catalogue with first-trigger attribution
//! - Additive, monotonic scoring with explanatory reason tags
//! - MITRE ATT&CK technique tagging per request
//! - Fire-and-forget analysis queue so the route never blocks
//!
//! # Example
//!
//! ```ignore
//! use hivetrap_agent_detection::{
//!     AgentDetectionConfig, AnalysisQueue, HoneypotAnalyzer,
//! };
//! use hivetrap_agent_detection::store::PostgresStore;
//! use std::sync::Arc;
//!
//! let config = AgentDetectionConfig::default();
//! let store = Arc::new(
//!     PostgresStore::connect(&url, config.session.timeout(), 5, 10_000).await?,
//! );
//! let analyzer = Arc::new(HoneypotAnalyzer::new(config, store));
//! analyzer.seed_tokens().await?;
//! let queue = AnalysisQueue::start(analyzer, 1_024);
//! queue.submit(raw_request);
//! ```

pub mod analyzer;
pub mod config;
pub mod detectors;
pub mod mitre;
pub mod patterns;
pub mod request;
pub mod score;
pub mod session;
pub mod store;
pub mod tokens;

pub use analyzer::{AnalysisQueue, DetectionResult, HoneypotAnalyzer};
pub use config::AgentDetectionConfig;
pub use request::{ApiKeyStatus, RawRequest, RequestMetadata};
pub use score::Classification;
pub use session::Session;
