//! Structural detection of external error and transport shapes
//!
//! HTTP client libraries and the OS networking layer raise values whose
//! interesting parts are buried in library-internal objects (sockets, TLS
//! contexts, request configs). These predicates recognize such values by the
//! keys they carry, never by a type name, so the redactor can extract a safe
//! subset and the classifier can pick a taxonomy entry.

use serde_json::{Map, Value};

/// Error codes raised when a remote endpoint cannot be reached
pub const CONNECTION_CODES: [&str; 5] = [
    "ESOCKETTIMEDOUT",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "ENOTFOUND",
    "ECONNRESET",
];

/// Error code of an expired TLS certificate
pub const CERT_EXPIRED_CODE: &str = "CERT_HAS_EXPIRED";

/// Body returned by gateways when the upstream did not answer in time
pub const UPSTREAM_TIMEOUT_BODY: &str = "The upstream server is timing out";

/// Error name given to HTTP client request failures
pub const REQUEST_ERROR_NAME: &str = "RequestError";

fn has_all(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().all(|key| obj.contains_key(*key))
}

/// A client response object: `data`, `status`, `statusText`, `headers`, `config`
pub fn is_response_like(obj: &Map<String, Value>) -> bool {
    has_all(obj, &["data", "status", "statusText", "headers", "config"])
}

/// A client request object: `path`, `method`, `host`, `protocol`, `res`
pub fn is_request_like(obj: &Map<String, Value>) -> bool {
    has_all(obj, &["path", "method", "host", "protocol", "res"])
}

/// A failed client request, identified by its error name
pub fn is_request_error(obj: &Map<String, Value>) -> bool {
    obj.get("name").and_then(Value::as_str) == Some(REQUEST_ERROR_NAME)
}

/// The connection failure code carried by a value or, when present, its `cause`
pub fn connection_code(obj: &Map<String, Value>) -> Option<&str> {
    let target = match obj.get("cause") {
        Some(Value::Object(cause)) => cause,
        Some(_) => return None,
        None => obj,
    };
    target
        .get("code")
        .and_then(Value::as_str)
        .filter(|code| CONNECTION_CODES.contains(code))
}

/// Whether the value is a connection failure
pub fn is_connection_error(obj: &Map<String, Value>) -> bool {
    connection_code(obj).is_some()
}

/// Whether the value reports an expired certificate
pub fn is_cert_expired(obj: &Map<String, Value>) -> bool {
    obj.get("code").and_then(Value::as_str) == Some(CERT_EXPIRED_CODE)
}
