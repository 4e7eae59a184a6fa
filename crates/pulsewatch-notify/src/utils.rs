//! Helpers shared by channels and the dispatcher.

use serde_json::Value;

/// Maximum length of an error message or response body kept on a notify log.
pub const MAX_BODY_LENGTH: usize = 4000;

/// Truncates `s` to at most `max_len` bytes on a char boundary.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// Replaces values of keys that usually hold secrets with `"***"`.
///
/// Matches (case-insensitively) keys containing password, passwd, pwd, token,
/// secret, api_key, apikey or credentials, at any depth.
pub fn redact_sensitive_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                let key_lower = key.to_lowercase();
                let is_sensitive = [
                    "password",
                    "passwd",
                    "pwd",
                    "token",
                    "secret",
                    "api_key",
                    "apikey",
                    "credentials",
                ]
                .iter()
                .any(|needle| key_lower.contains(needle));

                if is_sensitive {
                    redacted.insert(key.clone(), Value::String("***".to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_json(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(redact_sensitive_json).collect()),
        _ => value.clone(),
    }
}

/// Reads a non-empty string field of a channel config.
pub fn config_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
