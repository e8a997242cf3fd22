// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Content-aware redaction of captured bodies.

use serde_json::Value;

/// Replacement text for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Key substrings the default JSON sanitizer treats as sensitive.
pub const SENSITIVE_TERMS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "token",
    "apikey",
    "api_key",
    "access_token",
    "refresh_token",
    "private_key",
    "credit_card",
    "card_number",
    "cvv",
    "ssn",
    "social_security",
    "tax_id",
];

/// Redacts a captured body before it reaches the log record.
///
/// Sanitizers must be total: on any internal failure they return the input
/// unchanged. They see only the captured copy, never the bytes the
/// downstream handler reads.
pub trait BodySanitizer: Send + Sync {
    fn sanitize(&self, body: &[u8], content_type: &str) -> Vec<u8>;
}

/// Redacts JSON object values whose keys look sensitive.
///
/// Non-JSON content types and unparseable payloads pass through unchanged.
/// Matching is case-insensitive substring containment against the term
/// list; matched values are replaced wholesale with [`REDACTED`], arrays
/// are walked element-wise and nested objects recurse.
#[derive(Clone, Debug)]
pub struct JsonSanitizer {
    terms: Vec<String>,
}

impl Default for JsonSanitizer {
    fn default() -> Self {
        JsonSanitizer {
            terms: SENSITIVE_TERMS.iter().map(|t| (*t).to_string()).collect(),
        }
    }
}

impl JsonSanitizer {
    pub fn new() -> Self { JsonSanitizer::default() }

    /// Use a custom sensitive-term list instead of [`SENSITIVE_TERMS`].
    pub fn with_terms(terms: Vec<String>) -> Self {
        JsonSanitizer {
            terms: terms.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    fn redact(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, entry) in map.iter_mut() {
                    let key = key.to_lowercase();
                    if self.terms.iter().any(|term| key.contains(term)) {
                        *entry = Value::String(REDACTED.to_string());
                    } else {
                        self.redact(entry);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.redact(item);
                }
            }
            _ => {}
        }
    }
}

impl BodySanitizer for JsonSanitizer {
    fn sanitize(&self, body: &[u8], content_type: &str) -> Vec<u8> {
        if !content_type.to_ascii_lowercase().contains("application/json") {
            return body.to_vec();
        }
        let Ok(mut parsed) = serde_json::from_slice::<Value>(body) else {
            return body.to_vec();
        };
        if !parsed.is_object() {
            return body.to_vec();
        }
        self.redact(&mut parsed);
        serde_json::to_vec(&parsed).unwrap_or_else(|_| body.to_vec())
    }
}

/// Replaces every match of the configured patterns with [`REDACTED`],
/// pattern by pattern, in order.
pub struct RegexSanitizer {
    patterns: Vec<regex::bytes::Regex>,
}

impl RegexSanitizer {
    pub fn new(patterns: Vec<regex::bytes::Regex>) -> Self { RegexSanitizer { patterns } }

    /// Compile `patterns`; fails fast on an invalid expression.
    pub fn from_patterns(patterns: &[&str]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| regex::bytes::Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RegexSanitizer { patterns })
    }
}

impl BodySanitizer for RegexSanitizer {
    fn sanitize(&self, body: &[u8], _content_type: &str) -> Vec<u8> {
        let mut current = body.to_vec();
        for pattern in &self.patterns {
            current = pattern
                .replace_all(&current, REDACTED.as_bytes())
                .into_owned();
        }
        current
    }
}

/// Identity sanitizer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSanitizer;

impl BodySanitizer for NoopSanitizer {
    fn sanitize(&self, body: &[u8], _content_type: &str) -> Vec<u8> { body.to_vec() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize_json(body: &str) -> String {
        let out = JsonSanitizer::new().sanitize(body.as_bytes(), "application/json");
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn redacts_sensitive_keys() {
        let out = sanitize_json(r#"{"username":"john","password":"secret"}"#);
        assert!(out.contains(r#""username":"john""#));
        assert!(out.contains(r#""password":"[REDACTED]""#));
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let out = sanitize_json(r#"{"UserPassword":"x","ApiKey":"y","plain":"z"}"#);
        assert!(out.contains(r#""UserPassword":"[REDACTED]""#));
        assert!(out.contains(r#""ApiKey":"[REDACTED]""#));
        assert!(out.contains(r#""plain":"z""#));
    }

    #[test]
    fn recurses_into_nested_objects_and_arrays() {
        let out = sanitize_json(
            r#"{"users":[{"name":"a","token":"t1"},{"name":"b","credentials":{"secret":"s"}}]}"#,
        );
        assert!(out.contains(r#""token":"[REDACTED]""#));
        assert!(out.contains(r#""secret":"[REDACTED]""#));
        assert!(out.contains(r#""name":"a""#));
    }

    #[test]
    fn redacts_non_string_values_too() {
        let out = sanitize_json(r#"{"card_number":4111111111111111}"#);
        assert!(out.contains(r#""card_number":"[REDACTED]""#));
    }

    #[test]
    fn non_json_content_type_passes_through() {
        let body = br#"{"password":"secret"}"#;
        let out = JsonSanitizer::new().sanitize(body, "text/plain");
        assert_eq!(out, body);
    }

    #[test]
    fn json_with_charset_parameter_is_sanitized() {
        let body = br#"{"password":"secret"}"#;
        let out = JsonSanitizer::new().sanitize(body, "application/json; charset=utf-8");
        assert!(String::from_utf8(out).unwrap().contains(REDACTED));
    }

    #[test]
    fn invalid_json_passes_through() {
        let body = b"not json at all {";
        let out = JsonSanitizer::new().sanitize(body, "application/json");
        assert_eq!(out, body);
    }

    #[test]
    fn top_level_array_passes_through() {
        let body = br#"[{"password":"secret"}]"#;
        let out = JsonSanitizer::new().sanitize(body, "application/json");
        assert_eq!(out, body);
    }

    #[test]
    fn custom_terms_replace_the_default_set() {
        let sanitizer = JsonSanitizer::with_terms(vec!["Pin".to_string()]);
        let out = sanitizer.sanitize(
            br#"{"pin_code":"1234","password":"open"}"#,
            "application/json",
        );
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#""pin_code":"[REDACTED]""#));
        assert!(out.contains(r#""password":"open""#));
    }

    #[test]
    fn regex_sanitizer_replaces_in_order() {
        let sanitizer =
            RegexSanitizer::from_patterns(&[r"\d{4}-\d{4}-\d{4}-\d{4}", r"ssn=\d+"]).unwrap();
        let out = sanitizer.sanitize(b"card 1111-2222-3333-4444 ssn=123456789", "text/plain");
        assert_eq!(out, b"card [REDACTED] [REDACTED]".to_vec());
    }

    #[test]
    fn noop_is_identity() {
        let body = b"anything";
        assert_eq!(NoopSanitizer.sanitize(body, "application/json"), body);
    }
}
