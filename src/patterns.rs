//! Compiled detection patterns.
//!
//! Every table here is built once at first use and shared read-only across
//! all analyses:
//! - SQL injection regexes
//! - Bot/automation User-Agent indicators
//! - Path taxonomies (docs, OpenAPI, admin, internal)

use regex::Regex;
use std::sync::LazyLock;

/// SQL injection patterns, matched case-insensitively against the JSON
/// serialization of the request's query parameters and body.
pub static SQL_INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Statement keywords
        r"(?i)SELECT ",
        r"(?i)DROP ",
        r"(?i)INSERT ",
        r"(?i)UPDATE .*SET",
        r"(?i)DELETE FROM",
        // Quote/comment tricks
        r"(?i)'--",
        r"(?i)' OR",
        r"(?i)1\s*=\s*1",
        r"/\*",
        r"\*/",
        // Stacked and union queries
        r"(?i)UNION SELECT",
        r"(?i); DROP",
        r"(?i); DELETE",
        // Command execution
        r"(?i)EXEC(\s|\()",
        r"(?i)xp_cmdshell",
        // Time-based probes
        r"(?i)WAITFOR DELAY",
        r"(?i)BENCHMARK\(",
        r"(?i)SLEEP\(",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static SQL pattern must compile"))
    .collect()
});

/// Lowercase substrings that mark an automated or AI-driven User-Agent.
pub static BOT_INDICATORS: &[&str] = &[
    // Generic automation
    "bot", "crawler", "spider", "scraper",
    // HTTP libraries and CLI tools
    "python", "axios", "curl", "wget", "fetch", "postman", "insomnia",
    "httpie",
    // LLM and agent frameworks
    "gpt", "claude", "openai", "anthropic", "langchain", "autogpt",
    "agentgpt",
    // Browser automation
    "selenium", "puppeteer", "playwright", "headless", "phantom",
];

/// Documentation endpoints.
pub static DOCS_PATHS: &[&str] = &["/docs", "/documentation", "/api-docs", "/swagger"];

/// Machine-readable API schema endpoints.
pub static OPENAPI_PATHS: &[&str] = &[
    "/openapi",
    "/openapi.json",
    "/openapi.yaml",
    "/swagger.json",
    "/api/schema",
];

/// Administrative surfaces.
pub static ADMIN_PATHS: &[&str] = &[
    "/admin",
    "/api/admin",
    "/dashboard",
    "/internal",
    "/debug",
    "/config",
];

/// Internal/dangerous surfaces.
pub static INTERNAL_PATHS: &[&str] = &[
    "/internal",
    "/debug",
    "/shell",
    "/exec",
    "/eval",
    "/.env",
    "/config",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_patterns_compile() {
        assert!(!SQL_INJECTION_PATTERNS.is_empty());
    }

    #[test]
    fn sql_patterns_match_classic_payloads() {
        let hits = |s: &str| SQL_INJECTION_PATTERNS.iter().any(|p| p.is_match(s));
        assert!(hits("1' OR 1=1--"));
        assert!(hits("x; DROP TABLE users"));
        assert!(hits("UNION SELECT password FROM users"));
        assert!(hits("waitfor delay '0:0:5'"));
        assert!(hits("benchmark(1000000,md5(1))"));
        assert!(!hits("a perfectly ordinary search term"));
    }

    #[test]
    fn bot_indicators_are_lowercase() {
        for needle in BOT_INDICATORS {
            assert_eq!(*needle, needle.to_lowercase());
        }
    }

    #[test]
    fn taxonomies_share_surfaces() {
        // /internal, /debug and /config sit in both the admin and internal
        // taxonomies.
        for shared in ["/internal", "/debug", "/config"] {
            assert!(ADMIN_PATHS.contains(&shared));
            assert!(INTERNAL_PATHS.contains(&shared));
        }
    }
}
