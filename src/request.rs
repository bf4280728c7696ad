//! Request normalization.
//!
//! The external wildcard route ships an opaque [`RawRequest`] to the engine;
//! [`normalize`] turns it into the [`RequestMetadata`] every downstream
//! component consumes. Normalization is total: malformed headers, bodies or
//! query strings degrade to absent fields, never to an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Opaque request as captured by the honeypot route.
///
/// Headers and query are carried in wire order; downstream scans that depend
/// on ordering (API-key classification) stay deterministic because of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRequest {
    /// HTTP method.
    pub method: String,
    /// Request path, without the query string.
    pub path: String,
    /// Raw query string, if any.
    pub query_string: Option<String>,
    /// Header name/value pairs in wire order.
    pub headers: Vec<(String, String)>,
    /// Request body, if the route captured one.
    pub body: Option<String>,
    /// Peer address as seen by the route's socket.
    pub peer_ip: Option<String>,
    /// Status code the route answered with.
    #[serde(default = "default_status")]
    pub response_status: u16,
    /// Time the route took to answer, in milliseconds.
    #[serde(default)]
    pub response_time_ms: u64,
}

fn default_status() -> u16 {
    200
}

impl RawRequest {
    /// First header value matching `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of scanning the headers for an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    /// A qualifying header carried the planted bait key.
    Correct,
    /// A qualifying header carried some other value.
    Wrong,
    /// No qualifying header was present.
    None,
}

impl ApiKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyStatus::Correct => "correct",
            ApiKeyStatus::Wrong => "wrong",
            ApiKeyStatus::None => "none",
        }
    }
}

/// Normalized view of one honeypot request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Client IP, honoring forwarding headers.
    pub ip: String,
    /// User-Agent header, or `"unknown"`.
    pub user_agent: String,
    pub method: String,
    pub path: String,
    /// Query parameters, flattened last-wins.
    pub query_params: BTreeMap<String, String>,
    /// Decoded body: JSON value, form map as an object, or absent.
    pub body: Option<Value>,
    /// Headers with the cookie family removed, first value per name.
    pub headers: BTreeMap<String, String>,
    pub api_key_status: ApiKeyStatus,
    /// Value of the qualifying header, when one was found.
    pub api_key_used: Option<String>,
    pub response_status: u16,
    pub response_time_ms: u64,
}

/// Normalize an opaque request.
///
/// `bait_key` is the honeypot's planted API key; any qualifying header whose
/// value contains it classifies as [`ApiKeyStatus::Correct`].
pub fn normalize(raw: &RawRequest, bait_key: &str) -> RequestMetadata {
    let (api_key_status, api_key_used) = classify_api_key(&raw.headers, bait_key);

    RequestMetadata {
        ip: client_ip(raw),
        user_agent: raw
            .header("user-agent")
            .unwrap_or("unknown")
            .to_string(),
        method: raw.method.clone(),
        path: raw.path.clone(),
        query_params: flatten_query(raw.query_string.as_deref()),
        body: decode_body(raw),
        headers: sanitize_headers(&raw.headers),
        api_key_status,
        api_key_used,
        response_status: raw.response_status,
        response_time_ms: raw.response_time_ms,
    }
}

/// Client IP precedence: forwarded-for, real-ip, cloudflare, socket peer,
/// `"unknown"`.
fn client_ip(raw: &RawRequest) -> String {
    if let Some(forwarded) = raw.header("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = raw.header("x-real-ip") {
        if !real_ip.trim().is_empty() {
            return real_ip.trim().to_string();
        }
    }
    if let Some(cf_ip) = raw.header("cf-connecting-ip") {
        if !cf_ip.trim().is_empty() {
            return cf_ip.trim().to_string();
        }
    }
    raw.peer_ip
        .as_deref()
        .filter(|ip| !ip.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Flatten the query string into a map, last value wins on duplicate keys.
fn flatten_query(query_string: Option<&str>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    if let Some(qs) = query_string {
        for (key, value) in url::form_urlencoded::parse(qs.as_bytes()) {
            params.insert(key.into_owned(), value.into_owned());
        }
    }
    params
}

/// Decode the body according to the declared content type. Parse failures
/// yield `None`.
fn decode_body(raw: &RawRequest) -> Option<Value> {
    let body = raw.body.as_deref()?;
    if body.is_empty() {
        return None;
    }
    let content_type = raw.header("content-type").unwrap_or("").to_lowercase();

    if content_type.contains("json") {
        return serde_json::from_str(body).ok();
    }
    if content_type.contains("x-www-form-urlencoded") {
        let map: serde_json::Map<String, Value> = url::form_urlencoded::parse(body.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Some(Value::Object(map));
    }
    None
}

/// Strip the cookie family, keep everything else. First value per name wins.
fn sanitize_headers(headers: &[(String, String)]) -> BTreeMap<String, String> {
    let mut sanitized = BTreeMap::new();
    for (name, value) in headers {
        let lower = name.to_lowercase();
        if lower == "cookie" || lower == "set-cookie" {
            continue;
        }
        sanitized.entry(lower).or_insert_with(|| value.clone());
    }
    sanitized
}

/// Scan headers in wire order; the first qualifying header decides the
/// status.
fn classify_api_key(
    headers: &[(String, String)],
    bait_key: &str,
) -> (ApiKeyStatus, Option<String>) {
    for (name, value) in headers {
        let name_lower = name.to_lowercase();
        let qualifies = value.contains("sk_")
            || value.contains("sk-")
            || name_lower.contains("api")
            || name_lower.contains("authorization")
            || name_lower.contains("x-api-key");
        if !qualifies {
            continue;
        }
        let status = if value.contains(bait_key) {
            ApiKeyStatus::Correct
        } else {
            ApiKeyStatus::Wrong
        };
        return (status, Some(value.clone()));
    }
    (ApiKeyStatus::None, None)
}
