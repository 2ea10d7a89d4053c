//! Values that can be raised and classified
//!
//! [`Raised`] is the single input type of the classifier. Anything an
//! application can fail with converts into it: typed Rust errors, HTTP
//! exceptions, already classified exceptions and free-form JSON values
//! (payloads of external services, structured error bodies).

use http::StatusCode;
use serde_json::{json, Map, Value};
use std::fmt;

use super::ClassifiedException;

/// Stack frame that marks an exception built by the request validation layer
pub const VALIDATION_FRAME: &str = "validation::exception_factory";

/// A raised value awaiting classification
#[derive(Debug, Clone, PartialEq)]
pub enum Raised {
    /// Nothing was raised (`null`, empty string, `false`, `0`)
    Empty,
    /// A previously classified exception; classification copies it forward
    Classified(Box<ClassifiedException>),
    /// HTTP exception with its own status
    Http(HttpException),
    /// Named error with message, stack and structured fields
    Error(ErrorValue),
    /// Any other value
    Value(Value),
}

impl Raised {
    /// Convert any error, keeping its type name and source chain
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Raised::Error(ErrorValue::from_error(err))
    }

    /// Whether nothing was raised
    pub fn is_empty(&self) -> bool {
        matches!(self, Raised::Empty)
    }

    /// Key/value view used by the structural rules
    pub(crate) fn view(&self) -> Option<Map<String, Value>> {
        match self {
            Raised::Error(err) => Some(err.to_map()),
            Raised::Value(Value::Object(obj)) => Some(obj.clone()),
            _ => None,
        }
    }

    /// Stack carried by the value, if any
    pub(crate) fn stack(&self) -> &str {
        match self {
            Raised::Error(err) => &err.stack,
            Raised::Http(ex) => ex.stack(),
            _ => "",
        }
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

impl From<Value> for Raised {
    fn from(value: Value) -> Self {
        if is_falsy(&value) {
            Raised::Empty
        } else {
            Raised::Value(value)
        }
    }
}

impl From<&str> for Raised {
    fn from(value: &str) -> Self {
        Value::from(value).into()
    }
}

impl From<String> for Raised {
    fn from(value: String) -> Self {
        Value::from(value).into()
    }
}

impl From<ClassifiedException> for Raised {
    fn from(ex: ClassifiedException) -> Self {
        Raised::Classified(Box::new(ex))
    }
}

impl From<HttpException> for Raised {
    fn from(ex: HttpException) -> Self {
        Raised::Http(ex)
    }
}

impl From<ErrorValue> for Raised {
    fn from(err: ErrorValue) -> Self {
        Raised::Error(err)
    }
}

impl From<std::io::Error> for Raised {
    fn from(err: std::io::Error) -> Self {
        Raised::Error(ErrorValue::from(err))
    }
}

impl From<reqwest::Error> for Raised {
    fn from(err: reqwest::Error) -> Self {
        Raised::Error(ErrorValue::from(err))
    }
}

impl From<serde_json::Error> for Raised {
    fn from(err: serde_json::Error) -> Self {
        Raised::from_error(&err)
    }
}

impl From<crate::error::Error> for Raised {
    fn from(err: crate::error::Error) -> Self {
        Raised::from_error(&err)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Raised {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        let mut value = ErrorValue::new("Error", err.to_string());
        if let Some(source) = err.source() {
            value = value.with_source(source);
        }
        Raised::Error(value)
    }
}

/// A named error with structured fields
///
/// Fields such as `code`, `cause`, `response` or `config` are inspected
/// structurally by the classifier and the redactor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorValue {
    /// Error name, e.g. `QueryFailedError`
    pub name: String,
    /// Error message
    pub message: String,
    /// Stack, one frame per line after the `name: message` header
    pub stack: String,
    /// Structured fields
    pub fields: Map<String, Value>,
}

impl ErrorValue {
    /// Create an error with a `name: message` stack header
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        Self {
            stack: format!("{}: {}", name, message),
            name,
            message,
            fields: Map::new(),
        }
    }

    /// Build from any error; the name is the type name
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut value = Self::new(short_type_name::<E>(), err.to_string());
        if let Some(source) = err.source() {
            value = value.with_source(source);
        }
        value
    }

    /// Error answered by an external service
    ///
    /// `data` is the response body as received.
    pub fn response_error(status: u16, data: Value) -> Self {
        let status_text = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default();
        Self::new(
            crate::shape::REQUEST_ERROR_NAME,
            format!("Request failed with status code {}", status),
        )
        .with_field(
            "response",
            json!({"status": status, "statusText": status_text, "data": data}),
        )
    }

    /// Replace the stack
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    /// Set a structured field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the error `code` field (`ECONNREFUSED`, `CERT_HAS_EXPIRED`, ...)
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_field("code", code.into())
    }

    /// Record the source chain under `cause` and append it to the stack
    fn with_source(mut self, source: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut current = Some(source);
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        for message in &chain {
            self.stack.push_str("\nCaused by: ");
            self.stack.push_str(message);
        }
        if let Some(first) = chain.first() {
            let mut cause = Map::new();
            cause.insert("message".into(), Value::String(first.clone()));
            // connection codes are looked up on the cause when one is present
            if let Some(code) = self.fields.get("code") {
                cause.insert("code".into(), code.clone());
            }
            self.fields.insert("cause".into(), Value::Object(cause));
        }
        self
    }

    /// `{ name, message, ...fields }`
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::with_capacity(self.fields.len() + 2);
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("message".into(), Value::String(self.message.clone()));
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        map
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl From<std::io::Error> for ErrorValue {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let mut value = ErrorValue::new(short_type_name::<std::io::Error>(), err.to_string());
        let code = match err.kind() {
            ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            ErrorKind::TimedOut => Some("ETIMEDOUT"),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => Some("ECONNRESET"),
            _ => None,
        };
        if let Some(code) = code {
            value = value.with_code(code);
        }
        if let Some(errno) = err.raw_os_error() {
            value = value.with_field("errno", errno);
        }
        if let Some(source) = err.get_ref() {
            if let Some(inner) = source.source() {
                value = value.with_source(inner);
            }
        }
        value
    }
}

impl From<reqwest::Error> for ErrorValue {
    fn from(err: reqwest::Error) -> Self {
        let mut value = ErrorValue::new(crate::shape::REQUEST_ERROR_NAME, err.to_string());

        if err.is_connect() {
            value = value.with_code("ECONNREFUSED");
        } else if err.is_timeout() {
            value = value.with_code("ETIMEDOUT");
        }

        if let Some(url) = err.url() {
            value = value.with_field("config", json!({ "url": url.as_str() }));
        }

        if let Some(status) = err.status() {
            value = value.with_field(
                "response",
                json!({
                    "status": status.as_u16(),
                    "statusText": status.canonical_reason().unwrap_or_default(),
                }),
            );
        }

        if let Some(source) = std::error::Error::source(&err) {
            value = value.with_source(source);
        }
        value
    }
}

/// Last path segment of a type name, without generics
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Kind of an HTTP exception, selecting its localized fallback message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    PreconditionFailed,
    RequestTimeout,
    /// Built from an arbitrary status
    Other,
}

impl HttpKind {
    fn type_name(self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequestException",
            Self::Unauthorized => "UnauthorizedException",
            Self::Forbidden => "ForbiddenException",
            Self::NotFound => "NotFoundException",
            Self::PreconditionFailed => "PreconditionFailedException",
            Self::RequestTimeout => "RequestTimeoutException",
            Self::Other => "HttpException",
        }
    }
}

/// Exception carrying an HTTP status and a response body
///
/// The response is either a plain string or a `{ statusCode, message, error }`
/// object where `message` may be a list (validation rules).
#[derive(Debug, Clone, PartialEq)]
pub struct HttpException {
    status: StatusCode,
    response: Value,
    kind: HttpKind,
    cause: Option<String>,
    stack: String,
}

impl HttpException {
    /// Exception with an arbitrary status and response
    pub fn new(status: StatusCode, response: impl Into<Value>) -> Self {
        Self::build(status, response.into(), HttpKind::Other)
    }

    fn build(status: StatusCode, response: Value, kind: HttpKind) -> Self {
        let mut ex = Self {
            status,
            response,
            kind,
            cause: None,
            stack: String::new(),
        };
        ex.stack = ex.to_string();
        ex
    }

    fn of_kind(kind: HttpKind, status: StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or_default();
        Self::build(
            status,
            json!({ "statusCode": status.as_u16(), "message": reason }),
            kind,
        )
    }

    pub fn bad_request() -> Self {
        Self::of_kind(HttpKind::BadRequest, StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized() -> Self {
        Self::of_kind(HttpKind::Unauthorized, StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden() -> Self {
        Self::of_kind(HttpKind::Forbidden, StatusCode::FORBIDDEN)
    }

    pub fn not_found() -> Self {
        Self::of_kind(HttpKind::NotFound, StatusCode::NOT_FOUND)
    }

    pub fn precondition_failed() -> Self {
        Self::of_kind(HttpKind::PreconditionFailed, StatusCode::PRECONDITION_FAILED)
    }

    pub fn request_timeout() -> Self {
        Self::of_kind(HttpKind::RequestTimeout, StatusCode::REQUEST_TIMEOUT)
    }

    /// Validation failure listing the violated rules
    pub fn validation<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rules: Vec<Value> = rules.into_iter().map(|r| Value::String(r.into())).collect();
        let mut ex = Self::build(
            StatusCode::BAD_REQUEST,
            json!({ "statusCode": 400, "message": rules, "error": "Bad Request" }),
            HttpKind::BadRequest,
        );
        ex.stack.push_str("\n    at ");
        ex.stack.push_str(VALIDATION_FRAME);
        ex
    }

    /// Replace the message, keeping status and kind
    pub fn with_message(self, message: impl Into<String>) -> Self {
        let reason = self.status.canonical_reason().unwrap_or_default();
        let response = json!({
            "statusCode": self.status.as_u16(),
            "message": message.into(),
            "error": reason,
        });
        let cause = self.cause;
        let mut ex = Self::build(self.status, response, self.kind);
        ex.cause = cause;
        ex
    }

    /// Attach the underlying cause
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn response(&self) -> &Value {
        &self.response
    }

    pub fn kind(&self) -> HttpKind {
        self.kind
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Rules listed by a validation response
    pub fn rules(&self) -> Vec<String> {
        self.response
            .get("message")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn summary(&self) -> String {
        match &self.response {
            Value::String(text) => text.clone(),
            Value::Object(body) => match body.get("message") {
                Some(Value::String(text)) => text.clone(),
                _ => format!("{} Exception", self.status.canonical_reason().unwrap_or("Http")),
            },
            other => other.to_string(),
        }
    }
}

impl fmt::Display for HttpException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.type_name(), self.summary())
    }
}

impl std::error::Error for HttpException {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("pool exhausted")]
    struct PoolError {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn test_falsy_values_are_empty() {
        assert!(Raised::from(Value::Null).is_empty());
        assert!(Raised::from("").is_empty());
        assert!(Raised::from(json!(0)).is_empty());
        assert!(Raised::from(json!(false)).is_empty());
        assert!(!Raised::from("BOOM").is_empty());
    }

    #[test]
    fn test_from_error_uses_type_name_and_chain() {
        let err = PoolError {
            source: std::io::Error::other("socket closed"),
        };
        let value = ErrorValue::from_error(&err);
        assert_eq!(value.name, "PoolError");
        assert_eq!(value.message, "pool exhausted");
        assert!(value.stack.starts_with("PoolError: pool exhausted"));
        assert!(value.stack.contains("Caused by: socket closed"));
        assert_eq!(value.fields["cause"]["message"], "socket closed");
    }

    #[test]
    fn test_io_connection_kinds_map_to_codes() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let value = ErrorValue::from(refused);
        assert_eq!(value.fields["code"], "ECONNREFUSED");

        let other = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(ErrorValue::from(other).fields.get("code").is_none());
    }

    #[test]
    fn test_validation_exception_carries_marker() {
        let ex = HttpException::validation(["nombre no debe estar vacío", "edad debe ser un número"]);
        assert_eq!(ex.status(), StatusCode::BAD_REQUEST);
        assert!(ex.stack().contains(VALIDATION_FRAME));
        assert_eq!(ex.rules().len(), 2);
    }

    #[test]
    fn test_http_display() {
        assert_eq!(HttpException::not_found().to_string(), "NotFoundException: Not Found");
        let ex = HttpException::forbidden().with_message("Forbidden resource");
        assert_eq!(ex.to_string(), "ForbiddenException: Forbidden resource");
        assert_eq!(ex.kind(), HttpKind::Forbidden);
    }

    #[test]
    fn test_response_error_shape() {
        let err = ErrorValue::response_error(503, json!({"message": "down"}));
        let map = err.to_map();
        assert_eq!(map["name"], "RequestError");
        assert_eq!(map["response"]["status"], 503);
        assert_eq!(map["response"]["statusText"], "Service Unavailable");
    }
}
