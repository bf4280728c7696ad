//! User-Agent bot detection.

use crate::patterns::BOT_INDICATORS;

/// True when the User-Agent carries any known automation, scripting, or AI
/// agent indicator.
pub fn detect_bot_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    BOT_INDICATORS.iter().any(|needle| ua.contains(needle))
}

/// First matching indicator, for log context.
pub fn matched_bot_indicator(user_agent: &str) -> Option<&'static str> {
    let ua = user_agent.to_lowercase();
    BOT_INDICATORS
        .iter()
        .find(|needle| ua.contains(*needle))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browsers_pass() {
        assert!(!detect_bot_user_agent(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        ));
    }

    #[test]
    fn cli_tools_are_flagged() {
        assert!(detect_bot_user_agent("curl/8.0.1"));
        assert!(detect_bot_user_agent("Wget/1.21"));
        assert!(detect_bot_user_agent("python-requests/2.31.0"));
    }

    #[test]
    fn ai_agents_are_flagged() {
        assert!(detect_bot_user_agent("Mozilla/5.0 AppleWebKit GPTBot/1.0"));
        assert!(detect_bot_user_agent("claude-web/1.0"));
        assert!(detect_bot_user_agent("LangChain/0.2 python-httpx"));
    }

    #[test]
    fn headless_browsers_are_flagged() {
        assert!(detect_bot_user_agent("Mozilla/5.0 HeadlessChrome/119.0"));
        assert!(detect_bot_user_agent("Playwright/1.40"));
    }

    #[test]
    fn matching_ignores_case() {
        assert_eq!(matched_bot_indicator("CURL/8.0"), Some("curl"));
        assert_eq!(matched_bot_indicator("Mozilla/5.0"), None);
    }
}
