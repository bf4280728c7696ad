//! SQL injection detection over query parameters and body.

use crate::patterns::SQL_INJECTION_PATTERNS;
use serde_json::Value;
use std::collections::BTreeMap;

/// True when any SQL injection pattern matches the serialized request
/// content.
///
/// Query parameters and a JSON-object body are merged into one object (body
/// keys win) and serialized; a non-object body is appended to the haystack
/// as-is so array and string payloads are still scanned.
pub fn detect_sql_injection(
    query_params: &BTreeMap<String, String>,
    body: Option<&Value>,
) -> bool {
    let mut merged = serde_json::Map::new();
    for (key, value) in query_params {
        merged.insert(key.clone(), Value::String(value.clone()));
    }
    if let Some(Value::Object(obj)) = body {
        merged.extend(obj.clone());
    }

    let mut haystack = Value::Object(merged).to_string();
    if let Some(value) = body {
        if !value.is_object() {
            haystack.push_str(&value.to_string());
        }
    }

    SQL_INJECTION_PATTERNS.iter().any(|p| p.is_match(&haystack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn clean_request_is_not_flagged() {
        let query = params(&[("page", "2"), ("q", "blue widgets")]);
        assert!(!detect_sql_injection(&query, None));
    }

    #[test]
    fn quote_or_payload_in_query() {
        let query = params(&[("id", "1' OR 1=1--")]);
        assert!(detect_sql_injection(&query, None));
    }

    #[test]
    fn union_select_in_json_body() {
        let body = json!({"search": "x UNION SELECT username, password FROM users"});
        assert!(detect_sql_injection(&BTreeMap::new(), Some(&body)));
    }

    #[test]
    fn stacked_drop_in_body() {
        let body = json!({"name": "bob; DROP TABLE sessions"});
        assert!(detect_sql_injection(&BTreeMap::new(), Some(&body)));
    }

    #[test]
    fn non_object_body_is_scanned() {
        let body = json!(["harmless", "1; DELETE FROM accounts"]);
        assert!(detect_sql_injection(&BTreeMap::new(), Some(&body)));
    }

    #[test]
    fn case_is_ignored() {
        let query = params(&[("q", "union select 1,2,3")]);
        assert!(detect_sql_injection(&query, None));
    }
}
