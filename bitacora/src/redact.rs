//! Sensitive-value redaction
//!
//! Two layers keep secrets out of every sink:
//!
//! - [`Redactor`] walks arbitrary values (metadata, parsed errors) and masks
//!   sensitive keys and bearer tokens. External error shapes are reduced to a
//!   fixed safe subset before anything inside them is visited.
//! - [`Censor`] masks configured field paths (`token`, `metadata.0.pin`,
//!   `*.secret`) in the final record, right before it is written.
//!
//! Recursion is bounded by [`MAX_DEPTH`]: past it the value is stringified.
//! `serde_json::Value` trees are finite and acyclic, so the bound is the only
//! termination guarantee needed. Callers passing structures with shared or
//! cyclic references must serialize them first; serialization failures are
//! reported as strings and never escape.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;

use crate::shape;

/// Replacement for masked values
pub const MASK: &str = "*****";

/// Nesting depth past which values are stringified instead of walked
pub const MAX_DEPTH: usize = 10;

/// Keys masked regardless of configuration (compared lowercase)
pub const DEFAULT_SENSITIVE_KEYS: [&str; 11] = [
    "contrasena",
    "contrasenanueva",
    "password",
    "authorization",
    "cookie",
    "token",
    "idtoken",
    "accesstoken",
    "access_token",
    "refreshtoken",
    "refresh_token",
];

static BEARER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Bearer\s+[A-Za-z0-9.\-_]+").expect("bearer pattern should be valid")
});

/// Mask the token of every `Bearer <token>` occurrence, keeping the rest
pub fn mask_bearer(text: &str) -> Cow<'_, str> {
    if !text.contains("Bearer") {
        return Cow::Borrowed(text);
    }
    BEARER.replace_all(text, "Bearer *****")
}

/// Deep redaction of arbitrary values
#[derive(Debug, Clone)]
pub struct Redactor {
    sensitive: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self {
            sensitive: DEFAULT_SENSITIVE_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl Redactor {
    /// Redactor with the default sensitive keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Add sensitive keys on top of the defaults
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref().trim().to_lowercase();
            if !key.is_empty() && !self.sensitive.contains(&key) {
                self.sensitive.push(key);
            }
        }
        self
    }

    /// Add the keys named by configured `hide` entries
    ///
    /// A dotted path contributes its last segment, so `metadata.0.pin` masks
    /// every `pin` before the record is rendered anywhere. Wildcard and index
    /// segments name no key and are skipped.
    pub fn with_hidden<I, S>(self, hide: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<String> = hide
            .into_iter()
            .filter_map(|path| {
                let key = path.as_ref().rsplit('.').next()?.trim().to_string();
                (!key.is_empty() && key != "*" && key.parse::<usize>().is_err()).then_some(key)
            })
            .collect();
        self.with_keys(keys)
    }

    /// Whether a key is masked (case-insensitive)
    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.sensitive.iter().any(|s| *s == key)
    }

    /// Return a copy of `value` with sensitive leaves masked
    pub fn redact(&self, value: &Value) -> Value {
        self.redact_at(value, 0)
    }

    /// Serialize and redact any value
    ///
    /// A [`ClassifiedException`](crate::exception::ClassifiedException)
    /// serializes as its rendered text, so it is never walked. When
    /// serialization fails the error description takes the value's place.
    pub fn redact_serialize<T: Serialize + ?Sized>(&self, value: &T) -> Value {
        match serde_json::to_value(value) {
            Ok(value) => self.redact(&value),
            Err(err) => Value::String(err.to_string()),
        }
    }

    fn redact_at(&self, value: &Value, depth: usize) -> Value {
        if depth > MAX_DEPTH {
            return Value::String(stringify(value));
        }

        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.redact_at(item, depth + 1))
                    .collect(),
            ),
            Value::Object(obj) => self.redact_object(obj, depth),
            Value::String(text) => Value::String(mask_bearer(text).into_owned()),
            other => other.clone(),
        }
    }

    fn redact_object(&self, obj: &Map<String, Value>, depth: usize) -> Value {
        // shapes overlap; the first match wins
        if shape::is_response_like(obj) {
            return self.response_subset(obj, depth);
        }
        if shape::is_request_like(obj) {
            return Value::Object(pick(obj, &["path", "method", "host", "protocol"]));
        }
        if shape::is_request_error(obj) {
            return self.request_error_subset(obj, depth);
        }
        if shape::is_connection_error(obj) {
            return self.connection_error_subset(obj, depth);
        }
        if shape::is_cert_expired(obj) {
            return self.cert_error_subset(obj, depth);
        }

        let mut out = Map::with_capacity(obj.len());
        for (key, item) in obj {
            let redacted = if self.is_sensitive(key) {
                Value::String(MASK.to_string())
            } else {
                self.redact_at(item, depth + 1)
            };
            out.insert(key.clone(), redacted);
        }
        Value::Object(out)
    }

    fn response_subset(&self, obj: &Map<String, Value>, depth: usize) -> Value {
        let mut out = Map::new();
        if let Some(data) = obj.get("data") {
            out.insert("data".into(), self.redact_at(data, depth + 1));
        }
        copy(obj, &mut out, &["status", "statusText"]);
        Value::Object(out)
    }

    fn request_error_subset(&self, obj: &Map<String, Value>, depth: usize) -> Value {
        let mut out = pick(obj, &["code"]);
        if let Some(config) = obj.get("config").and_then(Value::as_object) {
            out.insert("config".into(), self.config_subset(config, depth));
        }
        if let Some(response) = obj.get("response").and_then(Value::as_object) {
            let mut subset = pick(response, &["status", "statusText"]);
            if let Some(data) = response.get("data") {
                subset.insert("data".into(), self.redact_at(data, depth + 1));
            }
            out.insert("response".into(), Value::Object(subset));
        }
        Value::Object(out)
    }

    fn connection_error_subset(&self, obj: &Map<String, Value>, depth: usize) -> Value {
        const FIELDS: [&str; 7] = ["name", "message", "errno", "code", "syscall", "address", "port"];

        let mut out = pick(obj, &FIELDS);
        if let Some(config) = obj.get("config").and_then(Value::as_object) {
            out.insert("config".into(), self.config_subset(config, depth));
        }
        if let Some(cause) = obj.get("cause").and_then(Value::as_object) {
            out.insert("cause".into(), Value::Object(pick(cause, &FIELDS)));
        }
        Value::Object(out)
    }

    fn cert_error_subset(&self, obj: &Map<String, Value>, depth: usize) -> Value {
        const FIELDS: [&str; 3] = ["name", "message", "code"];

        let mut out = pick(obj, &FIELDS);
        if let Some(config) = obj.get("config").and_then(Value::as_object) {
            out.insert("config".into(), self.config_subset(config, depth));
        }
        if let Some(cause) = obj.get("cause").and_then(Value::as_object) {
            out.insert("cause".into(), Value::Object(pick(cause, &FIELDS)));
        }
        Value::Object(out)
    }

    /// Request configuration of a client error: headers and body are redacted
    fn config_subset(&self, config: &Map<String, Value>, depth: usize) -> Value {
        let mut out = Map::new();
        if let Some(headers) = config.get("headers") {
            out.insert("headers".into(), self.redact_at(headers, depth + 1));
        }
        copy(config, &mut out, &["baseURL", "method", "url"]);
        if let Some(data) = config.get("data") {
            out.insert("data".into(), self.redact_at(data, depth + 1));
        }
        Value::Object(out)
    }
}

fn pick(obj: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    let mut out = Map::new();
    copy(obj, &mut out, keys);
    out
}

fn copy(from: &Map<String, Value>, to: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(value) = from.get(*key) {
            to.insert((*key).to_string(), value.clone());
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Path-based masking applied to every record before it reaches a sink
///
/// Paths are dot separated; a `*` segment matches any key or index at that
/// level. Only existing fields are masked, nothing is added.
#[derive(Debug, Clone, Default)]
pub struct Censor {
    paths: Vec<Vec<String>>,
}

impl Censor {
    /// Censor for the given paths
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = paths
            .into_iter()
            .filter_map(|path| {
                let segments: Vec<String> = path
                    .as_ref()
                    .split('.')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                (!segments.is_empty()).then_some(segments)
            })
            .collect();
        Self { paths }
    }

    /// Configured paths plus the top-level default sensitive keys
    pub fn with_defaults<I, S>(hide: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hide: Vec<String> = hide.into_iter().map(|p| p.as_ref().to_string()).collect();
        Self::new(
            hide.iter()
                .map(String::as_str)
                .chain(DEFAULT_SENSITIVE_KEYS.iter().copied()),
        )
    }

    /// Whether no path is configured
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Mask every configured path present in `value`
    pub fn apply(&self, value: &mut Value) {
        for path in &self.paths {
            censor_path(value, path);
        }
    }
}

fn censor_path(value: &mut Value, segments: &[String]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    match value {
        Value::Object(obj) => {
            if head == "*" {
                for child in obj.values_mut() {
                    censor_leaf_or_descend(child, rest);
                }
            } else if let Some(child) = obj.get_mut(head) {
                censor_leaf_or_descend(child, rest);
            }
        }
        Value::Array(items) => {
            if head == "*" {
                for child in items.iter_mut() {
                    censor_leaf_or_descend(child, rest);
                }
            } else if let Some(child) = head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                censor_leaf_or_descend(child, rest);
            }
        }
        _ => {}
    }
}

fn censor_leaf_or_descend(child: &mut Value, rest: &[String]) {
    if rest.is_empty() {
        *child = Value::String(MASK.to_string());
    } else {
        censor_path(child, rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_masks_sensitive_keys_case_insensitive() {
        let redactor = Redactor::new();
        let value = json!({"Password": "x", "user": {"TOKEN": "abc", "name": "ana"}});
        let out = redactor.redact(&value);
        assert_eq!(out["Password"], MASK);
        assert_eq!(out["user"]["TOKEN"], MASK);
        assert_eq!(out["user"]["name"], "ana");
    }

    #[test]
    fn test_masks_inside_arrays() {
        let out = Redactor::new().redact(&json!([{"cookie": "c"}, {"ok": 1}]));
        assert_eq!(out, json!([{"cookie": MASK}, {"ok": 1}]));
    }

    #[test]
    fn test_bearer_token_masked_in_strings() {
        let out = Redactor::new().redact(&json!("sent Bearer eyJhbGci.abc-def_1 to api"));
        assert_eq!(out, "sent Bearer ***** to api");

        let untouched = Redactor::new().redact(&json!("no tokens here"));
        assert_eq!(untouched, "no tokens here");
    }

    #[test]
    fn test_scenario_metadata() {
        let value = json!({
            "some": "value",
            "token": "abc123",
            "headers": {"authorization": "Bearer eyJ..."}
        });
        let out = Redactor::new().redact(&value);
        assert_eq!(out["some"], "value");
        assert_eq!(out["token"], MASK);
        assert_eq!(out["headers"]["authorization"], MASK);
    }

    #[test]
    fn test_extra_keys() {
        let redactor = Redactor::new().with_keys(["PIN"]);
        let out = redactor.redact(&json!({"pin": 1234, "Pin": 1}));
        assert_eq!(out, json!({"pin": MASK, "Pin": MASK}));
    }

    #[test]
    fn test_hidden_paths_add_their_last_segment() {
        let redactor = Redactor::new().with_hidden(["pin", "metadata.1.Clave", "items.*", "list.0", ""]);
        let out = redactor.redact(&json!({
            "a": {"pin": 1},
            "clave": "k",
            "items": [1],
            "list": ["x"],
        }));
        assert_eq!(out["a"]["pin"], MASK);
        assert_eq!(out["clave"], MASK);
        assert_eq!(out["items"], json!([1]));
        assert_eq!(out["list"], json!(["x"]));
    }

    #[test]
    fn test_depth_bound_stringifies() {
        let mut value = json!({"password": "deep"});
        for _ in 0..12 {
            value = json!({"next": value});
        }
        let out = Redactor::new().redact(&value);

        let mut cursor = &out;
        let mut levels = 0;
        while let Some(next) = cursor.get("next") {
            cursor = next;
            levels += 1;
        }
        // walking stops and the remainder becomes text
        assert!(levels <= MAX_DEPTH + 1);
        assert!(cursor.is_string());
    }

    #[test]
    fn test_masks_within_depth_bound() {
        let mut value = json!({"token": "t"});
        for _ in 0..9 {
            value = json!({"n": value});
        }
        let out = Redactor::new().redact(&value);
        let mut cursor = &out;
        while let Some(next) = cursor.get("n") {
            cursor = next;
        }
        assert_eq!(cursor["token"], MASK);
    }

    #[test]
    fn test_response_like_subset() {
        let value = json!({
            "data": {"password": "x", "ok": true},
            "status": 502,
            "statusText": "Bad Gateway",
            "headers": {"set-cookie": "s"},
            "config": {"socket": "internals"}
        });
        let out = Redactor::new().redact(&value);
        assert_eq!(
            out,
            json!({"data": {"password": MASK, "ok": true}, "status": 502, "statusText": "Bad Gateway"})
        );
    }

    #[test]
    fn test_request_error_subset() {
        let value = json!({
            "name": "RequestError",
            "code": "ERR_BAD_RESPONSE",
            "config": {
                "headers": {"Authorization": "Bearer abc"},
                "url": "/users",
                "method": "get",
                "agent": {"tls": "secret material"}
            },
            "response": {"status": 500, "data": {"token": "t"}, "request": {}},
            "request": {"socket": {}}
        });
        let out = Redactor::new().redact(&value);
        assert_eq!(out["code"], "ERR_BAD_RESPONSE");
        assert_eq!(out["config"]["headers"]["Authorization"], MASK);
        assert_eq!(out["config"]["url"], "/users");
        assert!(out["config"].get("agent").is_none());
        assert_eq!(out["response"], json!({"status": 500, "data": {"token": MASK}}));
        assert!(out.get("request").is_none());
    }

    #[test]
    fn test_connection_error_subset() {
        let value = json!({
            "name": "Error",
            "message": "connect ECONNREFUSED 127.0.0.1:80",
            "code": "ECONNREFUSED",
            "port": 80,
            "socket": {"handle": "internal"}
        });
        let out = Redactor::new().redact(&value);
        assert_eq!(out["code"], "ECONNREFUSED");
        assert_eq!(out["port"], 80);
        assert!(out.get("socket").is_none());
    }

    #[test]
    fn test_cert_error_subset() {
        let value = json!({"name": "Error", "code": "CERT_HAS_EXPIRED", "tls": {"key": "k"}});
        let out = Redactor::new().redact(&value);
        assert_eq!(out, json!({"name": "Error", "code": "CERT_HAS_EXPIRED"}));
    }

    #[test]
    fn test_redact_serialize_struct() {
        #[derive(Serialize)]
        struct Login<'a> {
            user: &'a str,
            password: &'a str,
        }
        let out = Redactor::new().redact_serialize(&Login { user: "ana", password: "pw" });
        assert_eq!(out, json!({"user": "ana", "password": MASK}));
    }

    #[test]
    fn test_redact_serialize_failure_falls_back_to_text() {
        use std::collections::BTreeMap;
        let mut bad = BTreeMap::new();
        bad.insert(vec![1u8], 1);
        let out = Redactor::new().redact_serialize(&bad);
        assert!(out.is_string());
    }

    #[test]
    fn test_censor_paths() {
        let censor = Censor::new(["metadata.0.pin", "*.secret", "missing.path"]);
        let mut record = json!({
            "metadata": {"0": {"pin": 1234, "name": "x"}},
            "a": {"secret": "s"},
            "b": {"secret": "t", "other": 1}
        });
        censor.apply(&mut record);
        assert_eq!(record["metadata"]["0"]["pin"], MASK);
        assert_eq!(record["metadata"]["0"]["name"], "x");
        assert_eq!(record["a"]["secret"], MASK);
        assert_eq!(record["b"]["secret"], MASK);
        assert_eq!(record["b"]["other"], 1);
        assert!(record.get("missing").is_none());
    }

    #[test]
    fn test_censor_with_defaults_masks_top_level_token() {
        let censor = Censor::with_defaults(Vec::<String>::new());
        let mut record = json!({"token": "t", "nested": {"token": "kept"}});
        censor.apply(&mut record);
        assert_eq!(record["token"], MASK);
        assert_eq!(record["nested"]["token"], "kept");
    }

    #[test]
    fn test_censor_array_index() {
        let censor = Censor::new(["items.1"]);
        let mut record = json!({"items": ["a", "b", "c"]});
        censor.apply(&mut record);
        assert_eq!(record["items"], json!(["a", MASK, "c"]));
    }
}
