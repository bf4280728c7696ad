//! Content and history detectors.
//!
//! Each detector is a pure function over the normalized request (and, where
//! relevant, the session snapshot held by the caller). The analyzer bundles
//! their outputs into a [`DetectorVerdicts`] value that the scoring engine
//! and the MITRE mapper consume.

pub mod injection;
pub mod paths;
pub mod user_agent;

pub use injection::detect_sql_injection;
pub use paths::{is_admin_path, is_docs_path, is_internal_path, is_openapi_path};
pub use user_agent::detect_bot_user_agent;

use crate::request::RequestMetadata;
use crate::tokens::TokenType;

/// Combined detector outputs for one request.
#[derive(Debug, Clone, Default)]
pub struct DetectorVerdicts {
    pub sql_injection: bool,
    pub bot_user_agent: bool,
    pub docs_path: bool,
    pub openapi_path: bool,
    pub admin_path: bool,
    pub internal_path: bool,
    /// Type of the honey token the request carried, if any.
    pub honey_token: Option<TokenType>,
}

impl DetectorVerdicts {
    /// Run the content and path detectors. The honey-token verdict is filled
    /// in separately by the registry.
    pub fn evaluate(meta: &RequestMetadata) -> Self {
        Self {
            sql_injection: detect_sql_injection(&meta.query_params, meta.body.as_ref()),
            bot_user_agent: detect_bot_user_agent(&meta.user_agent),
            docs_path: is_docs_path(&meta.path),
            openapi_path: is_openapi_path(&meta.path),
            admin_path: is_admin_path(&meta.path),
            internal_path: is_internal_path(&meta.path),
            honey_token: None,
        }
    }

    pub fn with_honey_token(mut self, token: Option<TokenType>) -> Self {
        self.honey_token = token;
        self
    }

    pub fn honey_token_triggered(&self) -> bool {
        self.honey_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_meta(path: &str, ua: &str) -> RequestMetadata {
        RequestMetadata {
            ip: "1.2.3.4".to_string(),
            user_agent: ua.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            query_params: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
            api_key_status: crate::request::ApiKeyStatus::None,
            api_key_used: None,
            response_status: 401,
            response_time_ms: 1,
        }
    }

    #[test]
    fn evaluate_combines_detectors() {
        let verdicts = DetectorVerdicts::evaluate(&make_meta("/api/docs", "curl/8.0"));
        assert!(verdicts.docs_path);
        assert!(verdicts.bot_user_agent);
        assert!(!verdicts.sql_injection);
        assert!(!verdicts.admin_path);
        assert!(!verdicts.honey_token_triggered());
    }

    #[test]
    fn honey_token_verdict_is_attached_later() {
        let verdicts = DetectorVerdicts::evaluate(&make_meta("/", "Mozilla/5.0"))
            .with_honey_token(Some(TokenType::AwsKey));
        assert!(verdicts.honey_token_triggered());
    }
}
