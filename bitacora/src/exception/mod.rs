//! Error classification
//!
//! Any raised value is normalized into a [`ClassifiedException`]: a taxonomy
//! code, an HTTP status, a client-safe message, and operator diagnostics
//! (cause, remediation hint, origin, stacks). Clients only ever see the
//! status and the client message; everything else goes to the sinks.
//!
//! ```rust
//! use bitacora::exception::{ClassifiedException, ErrorCode, ExceptionOptions};
//!
//! let ex = ClassifiedException::with_options(
//!     serde_json::json!({ "code": "ECONNREFUSED" }),
//!     ExceptionOptions::new().with_module("SEGIP"),
//! );
//! assert_eq!(ex.code(), ErrorCode::ServerConexion);
//! assert_eq!(ex.http_status().as_u16(), 500);
//! assert!(ex.client_message().starts_with("SEGIP :: "));
//! ```

mod classify;
mod code;
pub mod messages;
mod raised;

pub use classify::Classifier;
pub use code::ErrorCode;
pub use raised::{ErrorValue, HttpException, HttpKind, Raised, VALIDATION_FRAME};

use chrono::{DateTime, Local};
use http::StatusCode;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::level::LogLevel;

/// Metadata attached to records and exceptions
pub type Metadata = Map<String, Value>;

/// Format of the `fecha` field
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Explicit values that win over the classified ones
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExceptionOptions {
    pub message: Option<String>,
    pub metadata: Option<Metadata>,
    pub module: Option<String>,
    pub http_status: Option<StatusCode>,
    pub cause: Option<String>,
    pub action: Option<String>,
    pub code: Option<ErrorCode>,
    pub origin: Option<String>,
    /// Payload returned to the client even outside diagnostic mode
    pub client_info: Option<Value>,
}

impl ExceptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Add one metadata entry; values that fail to serialize become text
    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or_else(|e| Value::String(e.to_string()));
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_client_info(mut self, info: impl Serialize) -> Self {
        self.client_info = serde_json::to_value(info).ok();
        self
    }
}

impl From<&str> for ExceptionOptions {
    fn from(message: &str) -> Self {
        Self::new().with_message(message)
    }
}

/// A raised value normalized into the error taxonomy
///
/// Immutable once built. Classifying it again yields an equal value.
/// Serializes as its rendered text, so redaction never walks its internals.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedException {
    pub(crate) code: ErrorCode,
    pub(crate) http_status: StatusCode,
    pub(crate) message: String,
    pub(crate) module: String,
    pub(crate) cause: String,
    pub(crate) action: String,
    pub(crate) metadata: Metadata,
    pub(crate) origin: String,
    pub(crate) app_name: String,
    pub(crate) stack: String,
    pub(crate) full_stack: String,
    pub(crate) trace_stack: String,
    pub(crate) error: Option<Value>,
    pub(crate) client_info: Option<Value>,
    pub(crate) timestamp: DateTime<Local>,
}

impl ClassifiedException {
    /// Classify with the active logger configuration
    pub fn new(raised: impl Into<Raised>) -> Self {
        Self::with_options(raised, ExceptionOptions::default())
    }

    /// Classify with overrides
    pub fn with_options(raised: impl Into<Raised>, options: ExceptionOptions) -> Self {
        Classifier::current().classify(raised, options)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn http_status(&self) -> StatusCode {
        self.http_status
    }

    /// WARN below 500, ERROR otherwise
    pub fn level(&self) -> LogLevel {
        if self.http_status.as_u16() < 500 {
            LogLevel::Warn
        } else {
            LogLevel::Error
        }
    }

    /// Message without the module prefix
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `"<module> :: <message>"`, or the bare message without a module
    pub fn client_message(&self) -> String {
        if self.module.is_empty() {
            self.message.clone()
        } else {
            format!("{} :: {}", self.module, self.message)
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn cause(&self) -> &str {
        &self.cause
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Trimmed stack with bearer tokens masked
    pub fn sanitized_stack(&self) -> &str {
        &self.stack
    }

    /// Stack as raised
    pub fn full_stack(&self) -> &str {
        &self.full_stack
    }

    /// Backtrace of the classification call site
    pub fn trace_stack(&self) -> &str {
        &self.trace_stack
    }

    /// Redacted structural view of the raised value
    pub fn error(&self) -> Option<&Value> {
        self.error.as_ref()
    }

    pub fn client_info(&self) -> Option<&Value> {
        self.client_info.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Creation time as `YYYY-MM-DD HH:MM:SS.mmm`
    pub fn fecha(&self) -> String {
        self.timestamp.format(DATE_FORMAT).to_string()
    }

    /// `"<name> (<code>)"`
    pub fn code_name(&self) -> String {
        self.code.code_name()
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

impl fmt::Display for ClassifiedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = vec![
            format!("{}\n───────────────────────", self.code_name()),
            format!("─ Mensaje : {}", self.client_message()),
        ];

        if !self.cause.is_empty() {
            lines.push(format!("─ Causa   : {}", self.cause));
        }
        if !self.origin.is_empty() {
            lines.push(format!("─ Origen  : {}", self.origin));
        }
        if !self.action.is_empty() {
            lines.push(format!("─ Acción  : {}", self.action));
        }

        if !self.metadata.is_empty() {
            lines.push("\n───── Metadata ────────".to_string());
            for value in self.metadata.values() {
                lines.push(render(value));
                lines.push(String::new());
            }
        }

        let structured_error = match &self.error {
            Some(Value::Object(obj)) => !obj.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            _ => false,
        };
        if let (true, Some(error)) = (structured_error, &self.error) {
            lines.push("\n───── Error ───────────".to_string());
            lines.push(render(error));
        }

        if !self.stack.is_empty() {
            lines.push("\n───── Error stack ─────".to_string());
            lines.push(self.stack.clone());
        }
        if !self.trace_stack.is_empty() {
            lines.push("\n───── Trace stack ─────".to_string());
            lines.push(self.trace_stack.clone());
        }

        lines.push(String::new());
        f.write_str(&lines.join("\n"))
    }
}

impl std::error::Error for ClassifiedException {}

impl Serialize for ClassifiedException {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
