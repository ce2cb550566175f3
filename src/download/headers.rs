//! Captured request headers and cookies, normalized for replay.
//!
//! The browser hands over whatever it observed on the wire: header objects
//! that may contain HTTP/2 pseudo-headers, cookie lists in several shapes, or
//! nothing at all. [`RequestContext`] keeps that raw capture and turns it into
//! plain name/value maps on demand; malformed pieces degrade to empty maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::DROPPED_HEADERS;

/// Headers and cookies observed on an authenticated browser request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Raw header object as captured (`{"name": "value", ...}`).
    #[serde(default)]
    pub headers: Value,
    /// Raw cookie capture: a list of `{name, value}` objects or a flat object.
    #[serde(default)]
    pub cookies: Value,
}

impl RequestContext {
    /// Creates a context from raw captured values.
    #[must_use]
    pub fn new(headers: Value, cookies: Value) -> Self {
        Self { headers, cookies }
    }

    /// Returns `true` when neither headers nor cookies were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replay_headers().is_empty() && self.cookie_map().is_empty()
    }

    /// Header map safe to send from a plain HTTP client.
    ///
    /// Pseudo-headers (leading `:`) and `host`/`connection` are dropped. When
    /// cookies were captured separately, a captured `cookie` header is dropped
    /// too so the two sources cannot disagree.
    #[must_use]
    pub fn replay_headers(&self) -> BTreeMap<String, String> {
        let has_cookie_list = !self.cookie_map().is_empty();
        normalize_headers(&self.headers)
            .into_iter()
            .filter(|(name, _)| !(has_cookie_list && name.eq_ignore_ascii_case("cookie")))
            .collect()
    }

    /// Cookie name/value map.
    #[must_use]
    pub fn cookie_map(&self) -> BTreeMap<String, String> {
        normalize_cookies(&self.cookies)
    }

    /// `Cookie` header value built from [`cookie_map`](Self::cookie_map), if any.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookie_map();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Normalizes a captured header object into a replayable map.
///
/// Non-object input yields an empty map. Non-string values are rendered with
/// their JSON text; `null` values are skipped.
#[must_use]
pub fn normalize_headers(raw: &Value) -> BTreeMap<String, String> {
    let Value::Object(map) = raw else {
        return BTreeMap::new();
    };
    map.iter()
        .filter(|(name, _)| !is_dropped_header(name))
        .filter_map(|(name, value)| value_to_string(value).map(|v| (name.clone(), v)))
        .collect()
}

/// Normalizes a captured cookie list into a name/value map.
///
/// Accepts `[{"name": .., "value": ..}, ..]` or `{"name": "value", ..}`;
/// anything else, and any entry without a string name, is ignored.
#[must_use]
pub fn normalize_cookies(raw: &Value) -> BTreeMap<String, String> {
    match raw {
        Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| {
                let name = entry.get("name")?.as_str()?;
                if name.is_empty() {
                    return None;
                }
                let value = entry.get("value").and_then(value_to_string)?;
                Some((name.to_string(), value))
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(name, value)| value_to_string(value).map(|v| (name.clone(), v)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn is_dropped_header(name: &str) -> bool {
    name.starts_with(':')
        || DROPPED_HEADERS
            .iter()
            .any(|dropped| name.eq_ignore_ascii_case(dropped))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
