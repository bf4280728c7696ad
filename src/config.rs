//! Configuration types for the agent-likeness detection engine.

use crate::tokens::TokenType;
use serde::{Deserialize, Serialize};

/// Main configuration.
///
/// Loadable from a JSON or YAML file; every section falls back to its
/// defaults when absent. The store URL and credential come from the
/// environment, never from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDetectionConfig {
    /// Honeypot bait settings
    pub honeypot: HoneypotConfig,

    /// Session stitching settings
    pub session: SessionConfig,

    /// Analysis pipeline settings
    pub analysis: AnalysisConfig,

    /// Persistent store settings
    pub store: StoreConfig,
}

/// Bait material planted by the honeypot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoneypotConfig {
    /// The API key the honeypot route hands out as "valid". Any qualifying
    /// header containing it classifies as a correct key.
    pub bait_api_key: String,

    /// Extra honey tokens to seed beyond the built-in catalogue.
    pub extra_tokens: Vec<SeedTokenConfig>,
}

impl Default for HoneypotConfig {
    fn default() -> Self {
        Self {
            bait_api_key: "sk_live_hv_8c1e2f9a7d4b".to_string(),
            extra_tokens: vec![],
        }
    }
}

/// One operator-provided honey token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTokenConfig {
    pub token_type: TokenType,
    pub token_value: String,
}

/// Session stitching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sliding inactivity timeout in seconds.
    pub timeout_seconds: u64,

    /// Capacity of the `(ip, user_agent)` session lookup cache.
    pub lookup_cache_size: u64,
}

impl SessionConfig {
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_seconds as i64)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 600,
            lookup_cache_size: 10_000,
        }
    }
}

/// Analysis pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Per-analysis deadline in milliseconds. Store steps that miss it are
    /// abandoned; the result is still produced.
    pub deadline_ms: u64,

    /// Bound on queued-but-unanalyzed requests; the oldest entry is dropped
    /// on overflow.
    pub queue_capacity: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 2_000,
            queue_capacity: 1_024,
        }
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection pool bound.
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentDetectionConfig::default();
        assert_eq!(config.session.timeout_seconds, 600);
        assert_eq!(config.analysis.deadline_ms, 2_000);
        assert_eq!(config.analysis.queue_capacity, 1_024);
        assert!(config.honeypot.bait_api_key.starts_with("sk_live_"));
        assert!(config.honeypot.extra_tokens.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = AgentDetectionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AgentDetectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session.timeout_seconds, config.session.timeout_seconds);
        assert_eq!(parsed.honeypot.bait_api_key, config.honeypot.bait_api_key);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{
            "honeypot": { "bait_api_key": "sk_live_custom" },
            "analysis": { "queue_capacity": 64 }
        }"#;
        let config: AgentDetectionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.honeypot.bait_api_key, "sk_live_custom");
        assert_eq!(config.analysis.queue_capacity, 64);
        // Untouched sections keep their defaults.
        assert_eq!(config.session.timeout_seconds, 600);
        assert_eq!(config.analysis.deadline_ms, 2_000);
    }

    #[test]
    fn test_extra_tokens_parse() {
        let json = r#"{
            "honeypot": {
                "extra_tokens": [
                    { "token_type": "aws_key", "token_value": "AKIAEXTRA000EXAMPLE" }
                ]
            }
        }"#;
        let config: AgentDetectionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.honeypot.extra_tokens.len(), 1);
        assert_eq!(
            config.honeypot.extra_tokens[0].token_type,
            TokenType::AwsKey
        );
    }

    #[test]
    fn test_session_timeout_conversion() {
        let config = SessionConfig {
            timeout_seconds: 90,
            ..Default::default()
        };
        assert_eq!(config.timeout(), chrono::Duration::seconds(90));
    }
}
