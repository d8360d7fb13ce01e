//! Context Sanitizer (C1).
//!
//! Takes an untrusted key/value map and returns a shaped copy safe for wire
//! transmission. Pure and deterministic given its inputs; never errors, only
//! drops/truncates and logs at debug level.

use crate::types::{ContextMap, ContextValue};
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_KEY_RUNES: usize = 100;
const MAX_STRING_RUNES: usize = 10_000;
const MAX_LIST_LEN: usize = 100;
const MAX_TOOL_PARAM_MAP_LEN: usize = 20;
const MAX_SECRET_STRING_LEN: usize = 500;
const REDACTION_MARKER: &str = "[REDACTED]";
const TRUNCATION_SUFFIX: &str = "...[truncated]";

/// Internal metadata keys that must never be echoed back to the LLM.
const DENYLISTED_KEYS: &[&str] = &[
    "budget_counter",
    "budget_counters",
    "token_total",
    "token_totals",
    "provider",
    "model",
    "_internal",
];

static SECRET_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)token|secret|password|key|credential|auth").expect("valid secret-key regex")
});

/// Truncate a string to at most `limit` Unicode scalar values (runes),
/// never splitting a codepoint and never introducing `\u{FFFD}`.
pub fn rune_truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    s.chars().take(limit).collect()
}

fn is_denylisted_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    DENYLISTED_KEYS.iter().any(|d| lower == *d)
}

/// Whether a key name suggests it carries a secret (forced-tool path, §4.1).
pub fn is_secret_key(key: &str) -> bool {
    SECRET_KEY_PATTERN.is_match(key)
}

/// Sanitize a context map destined for the wire / LLM. Maps are not length
/// bounded at the top level (context maps are otherwise unbounded); use
/// [`sanitize_tool_params`] for the bounded tool-parameter variant.
pub fn sanitize_context(input: &ContextMap) -> ContextMap {
    sanitize_map(input, usize::MAX, false)
}

/// Sanitize a tool-parameter map: bounded to 20 entries, with secret
/// redaction applied (forced-tool path, §4.1).
pub fn sanitize_tool_params(input: &ContextMap) -> ContextMap {
    sanitize_map(input, MAX_TOOL_PARAM_MAP_LEN, true)
}

fn sanitize_map(input: &ContextMap, max_len: usize, redact_secrets: bool) -> ContextMap {
    let mut out = ContextMap::new();
    for (key, value) in input.iter() {
        if out.len() >= max_len {
            log::debug!("sanitize: map truncated at {max_len} entries");
            break;
        }
        if key.is_empty() {
            log::debug!("sanitize: dropping empty key");
            continue;
        }
        if is_denylisted_key(key) {
            log::debug!("sanitize: stripping denylisted key {key}");
            continue;
        }
        let truncated_key = rune_truncate(key, MAX_KEY_RUNES);
        match sanitize_value(value, redact_secrets && is_secret_key(&truncated_key)) {
            Some(v) => {
                out.insert(truncated_key, v);
            }
            None => log::debug!("sanitize: dropping unsupported value for key {key}"),
        }
    }
    out
}

fn sanitize_value(value: &ContextValue, redact: bool) -> Option<ContextValue> {
    match value {
        ContextValue::Null => Some(ContextValue::Null),
        ContextValue::Bool(b) => Some(ContextValue::Bool(*b)),
        ContextValue::Int(i) => Some(ContextValue::Int(*i)),
        ContextValue::Float(f) => Some(ContextValue::Float(*f)),
        ContextValue::Str(s) => Some(ContextValue::Str(sanitize_string(s, redact))),
        ContextValue::List(items) => {
            let truncated: Vec<ContextValue> = items
                .iter()
                .take(MAX_LIST_LEN)
                .filter_map(|v| sanitize_value(v, redact))
                .collect();
            Some(ContextValue::List(truncated))
        }
        ContextValue::Map(m) => {
            let inner = sanitize_map_recursive(m, redact);
            Some(ContextValue::Map(inner))
        }
    }
}

fn sanitize_map_recursive(
    input: &indexmap::IndexMap<String, ContextValue>,
    redact: bool,
) -> indexmap::IndexMap<String, ContextValue> {
    let mut out = indexmap::IndexMap::new();
    for (key, value) in input.iter() {
        if out.len() >= MAX_TOOL_PARAM_MAP_LEN {
            break;
        }
        if key.is_empty() || is_denylisted_key(key) {
            continue;
        }
        let truncated_key = rune_truncate(key, MAX_KEY_RUNES);
        let key_is_secret = redact && is_secret_key(&truncated_key);
        if let Some(v) = sanitize_value(value, key_is_secret) {
            out.insert(truncated_key, v);
        }
    }
    out
}

fn sanitize_string(s: &str, redact: bool) -> String {
    if redact {
        if s.chars().count() > MAX_SECRET_STRING_LEN {
            return format!(
                "{}{}",
                rune_truncate(s, MAX_SECRET_STRING_LEN),
                TRUNCATION_SUFFIX
            );
        }
        return REDACTION_MARKER.to_string();
    }
    rune_truncate(s, MAX_STRING_RUNES)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(pairs: Vec<(&str, ContextValue)>) -> ContextMap {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn sanitizer_is_idempotent() {
        let m = map_of(vec![
            ("name".into(), ContextValue::Str("hi".into())),
            (
                "nested".into(),
                ContextValue::Map(map_of(vec![("x".into(), ContextValue::Int(1))])),
            ),
        ]);
        let once = sanitize_context(&m);
        let twice = sanitize_context(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn denylisted_keys_are_stripped() {
        let m = map_of(vec![
            ("token_total".into(), ContextValue::Int(5)),
            ("provider".into(), ContextValue::Str("openai".into())),
            ("ok".into(), ContextValue::Str("fine".into())),
        ]);
        let sanitized = sanitize_context(&m);
        assert!(!sanitized.contains_key("token_total"));
        assert!(!sanitized.contains_key("provider"));
        assert!(sanitized.contains_key("ok"));
    }

    #[test]
    fn secret_keys_are_redacted_in_tool_params() {
        let m = map_of(vec![("api_token".into(), ContextValue::Str("sekret".into()))]);
        let sanitized = sanitize_tool_params(&m);
        assert_eq!(
            sanitized.get("api_token").unwrap().as_str().unwrap(),
            REDACTION_MARKER
        );
    }

    #[test]
    fn long_secret_strings_are_truncated_with_suffix_instead_of_redacted() {
        let long = "x".repeat(600);
        let m = map_of(vec![("password".into(), ContextValue::Str(long))]);
        let sanitized = sanitize_tool_params(&m);
        let value = sanitized.get("password").unwrap().as_str().unwrap();
        assert!(value.ends_with(TRUNCATION_SUFFIX));
        assert!(value.chars().count() <= MAX_SECRET_STRING_LEN + TRUNCATION_SUFFIX.len());
    }

    #[test]
    fn string_values_are_rune_truncated_without_replacement_chars() {
        let long = "é".repeat(20_000);
        let m = map_of(vec![("s".into(), ContextValue::Str(long))]);
        let sanitized = sanitize_context(&m);
        let value = sanitized.get("s").unwrap().as_str().unwrap();
        assert_eq!(value.chars().count(), MAX_STRING_RUNES);
        assert!(!value.contains('\u{FFFD}'));
    }

    #[test]
    fn lists_are_truncated_at_100() {
        let items: Vec<ContextValue> = (0..150).map(ContextValue::Int).collect();
        let m = map_of(vec![("l".into(), ContextValue::List(items))]);
        let sanitized = sanitize_context(&m);
        match sanitized.get("l").unwrap() {
            ContextValue::List(l) => assert_eq!(l.len(), MAX_LIST_LEN),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn tool_param_maps_are_bounded_at_20() {
        let m: ContextMap = (0..30)
            .map(|i| (format!("k{i}"), ContextValue::Int(i)))
            .collect();
        let sanitized = sanitize_tool_params(&m);
        assert_eq!(sanitized.len(), MAX_TOOL_PARAM_MAP_LEN);
    }

    #[test]
    fn rune_truncate_respects_rune_count_over_bytes() {
        let s = "a".repeat(10);
        let truncated = rune_truncate(&s, 5);
        assert_eq!(truncated.chars().count(), 5);
    }

    #[test]
    fn is_secret_key_matches_case_insensitively() {
        assert!(is_secret_key("API_TOKEN"));
        assert!(is_secret_key("Password"));
        assert!(is_secret_key("auth_header"));
        assert!(!is_secret_key("tool_name"));
    }
}
