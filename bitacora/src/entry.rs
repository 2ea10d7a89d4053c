//! Log and audit entries
//!
//! Call sites pass one of a few argument shapes; everything is normalized
//! here into a record, then into the line body persisted by the sinks.
//! Building never fails: values that cannot be serialized are kept as their
//! error description.
//!
//! | Call | Result |
//! |---|---|
//! | `info("ready")` | `metadata = {"0": "ready"}` |
//! | `info(("user", json!({"id": 1})))` | `metadata = {"0": "user", "1": {"id": 1}}` |
//! | `info(LogOptions::new("ready").with_module("M"))` | `mensaje = "M :: ready"` |
//! | `audit("authentication", "login")` | `msg = "login"` |
//! | `audit("authentication", ("login", meta))` | `msg = "login"`, metadata keys inlined |

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::current_request_id;
use crate::exception::{ClassifiedException, Metadata, DATE_FORMAT};
use crate::level::{AuditLevel, LogLevel};
use crate::redact::Redactor;

/// Keys that belong to the audit line itself
pub const RESERVED_AUDIT_KEYS: [&str; 6] = ["level", "time", "context", "msg", "reqId", "pid"];

static HOSTNAME: Lazy<String> = Lazy::new(|| {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
});

/// Host name recorded on exception lines
pub fn host_name() -> &'static str {
    HOSTNAME.as_str()
}

fn to_value_lossy<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| Value::String(e.to_string()))
}

/// Explicit message, metadata and module of a log call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogOptions {
    pub message: Option<String>,
    pub metadata: Option<Metadata>,
    pub module: Option<String>,
}

impl LogOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), to_value_lossy(value));
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

/// Arguments of a log call
#[derive(Debug, Clone, PartialEq)]
pub enum LogArgs {
    /// Values stored by position: `{"0": .., "1": ..}`
    Positional(Vec<Value>),
    /// Fields used as given
    Options(LogOptions),
}

impl LogArgs {
    /// Index-keyed metadata of positional values
    pub fn indexed(values: Vec<Value>) -> Metadata {
        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| (index.to_string(), value))
            .collect()
    }
}

impl From<&str> for LogArgs {
    fn from(message: &str) -> Self {
        LogArgs::Positional(vec![Value::from(message)])
    }
}

impl From<String> for LogArgs {
    fn from(message: String) -> Self {
        LogArgs::Positional(vec![Value::from(message)])
    }
}

impl From<Value> for LogArgs {
    fn from(value: Value) -> Self {
        LogArgs::Positional(vec![value])
    }
}

impl From<Vec<Value>> for LogArgs {
    fn from(values: Vec<Value>) -> Self {
        LogArgs::Positional(values)
    }
}

impl<T: Serialize> From<(&str, T)> for LogArgs {
    fn from((message, value): (&str, T)) -> Self {
        LogArgs::Positional(vec![Value::from(message), to_value_lossy(value)])
    }
}

impl<T: Serialize> From<(&str, T, &str)> for LogArgs {
    fn from((message, value, module): (&str, T, &str)) -> Self {
        LogArgs::Positional(vec![
            Value::from(message),
            to_value_lossy(value),
            Value::from(module),
        ])
    }
}

impl From<LogOptions> for LogArgs {
    fn from(options: LogOptions) -> Self {
        LogArgs::Options(options)
    }
}

/// A general-pipeline record below the exception levels
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    level: LogLevel,
    message: String,
    module: String,
    metadata: Metadata,
    timestamp: DateTime<Local>,
}

impl LogRecord {
    /// Normalize call arguments; metadata is redacted
    pub fn build(level: LogLevel, args: impl Into<LogArgs>, redactor: &Redactor) -> Self {
        let (message, module, metadata) = match args.into() {
            LogArgs::Positional(values) => (String::new(), String::new(), LogArgs::indexed(values)),
            LogArgs::Options(options) => (
                options.message.unwrap_or_default(),
                options.module.unwrap_or_default(),
                options.metadata.unwrap_or_default(),
            ),
        };

        let metadata = if metadata.is_empty() {
            metadata
        } else {
            match redactor.redact(&Value::Object(metadata)) {
                Value::Object(redacted) => redacted,
                other => LogArgs::indexed(vec![other]),
            }
        };

        Self {
            level,
            message,
            module,
            metadata,
            timestamp: Local::now(),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// `"<module> :: <message>"`, or the bare message without a module
    pub fn client_message(&self) -> String {
        if self.module.is_empty() {
            self.message.clone()
        } else {
            format!("{} :: {}", self.module, self.message)
        }
    }

    /// Persisted line body
    pub fn entry(&self) -> LogEntry {
        let message = self.client_message();
        LogEntry {
            pid: std::process::id(),
            req_id: current_request_id(),
            fecha: self.timestamp.format(DATE_FORMAT).to_string(),
            message: (!message.is_empty()).then_some(message),
            metadata: (!self.metadata.is_empty()).then(|| self.metadata.clone()),
            ..LogEntry::default()
        }
    }

    /// Console text: the message, then each metadata value
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        let message = self.client_message();
        if !message.is_empty() {
            lines.push(message);
        }
        for value in self.metadata.values() {
            lines.push(match value {
                Value::String(text) => text.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
            });
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

/// Body of a general-pipeline line
///
/// `level` and `time` are added by the pipeline when the line is written.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    pub fecha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(rename = "modulo", skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(rename = "mensaje", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(rename = "codigo", skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "causa", skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(rename = "origen", skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(rename = "accion", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(rename = "formato", skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl LogEntry {
    /// Line body of a classified exception
    pub fn from_exception(ex: &ClassifiedException) -> Self {
        let message = ex.client_message();
        let full_stack = ex.full_stack().to_string();

        // the parsed error is dropped when it only repeats the stack
        let error = ex.error().cloned().filter(|error| match error {
            Value::String(text) => text.is_empty() || *text != full_stack,
            _ => true,
        });

        LogEntry {
            pid: std::process::id(),
            hostname: Some(host_name().to_string()),
            req_id: current_request_id(),
            fecha: ex.fecha(),
            level_text: Some(ex.level().as_str().to_string()),
            app_name: Some(ex.app_name().to_string()),
            module: Some(ex.module().to_string()),
            message: (!message.is_empty()).then_some(message),
            http_status: Some(ex.http_status().as_u16()),
            code: Some(ex.code_name()),
            cause: Some(ex.cause().to_string()),
            origin: Some(ex.origin().to_string()),
            action: Some(ex.action().to_string()),
            error,
            format: Some(ex.to_string()),
            error_stack: Some(full_stack),
            trace_stack: Some(ex.trace_stack().to_string()),
            metadata: (!ex.metadata().is_empty()).then(|| ex.metadata().clone()),
        }
    }

    /// JSON object of the line body
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(other) => LogArgs::indexed(vec![other]),
            Err(err) => {
                let mut map = Map::new();
                map.insert("error".into(), Value::String(err.to_string()));
                map
            }
        }
    }
}

/// Explicit message, metadata and console format of an audit call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditOptions {
    pub message: Option<String>,
    pub metadata: Option<Metadata>,
    /// Console-only rendering, never persisted
    pub format: Option<String>,
}

impl AuditOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), to_value_lossy(value));
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Arguments of an audit call
#[derive(Debug, Clone, PartialEq)]
pub enum AuditArgs {
    Message(String),
    MessageWithMetadata(String, Metadata),
    Options(AuditOptions),
}

impl AuditArgs {
    pub fn into_options(self) -> AuditOptions {
        match self {
            AuditArgs::Message(message) => AuditOptions::new(message),
            AuditArgs::MessageWithMetadata(message, metadata) => {
                AuditOptions::new(message).with_metadata(metadata)
            }
            AuditArgs::Options(options) => options,
        }
    }
}

impl From<&str> for AuditArgs {
    fn from(message: &str) -> Self {
        AuditArgs::Message(message.to_string())
    }
}

impl From<String> for AuditArgs {
    fn from(message: String) -> Self {
        AuditArgs::Message(message)
    }
}

impl From<(&str, Metadata)> for AuditArgs {
    fn from((message, metadata): (&str, Metadata)) -> Self {
        AuditArgs::MessageWithMetadata(message.to_string(), metadata)
    }
}

impl From<(&str, Value)> for AuditArgs {
    fn from((message, value): (&str, Value)) -> Self {
        let metadata = match value {
            Value::Object(map) => map,
            Value::Null => Metadata::new(),
            other => LogArgs::indexed(vec![other]),
        };
        AuditArgs::MessageWithMetadata(message.to_string(), metadata)
    }
}

impl From<AuditOptions> for AuditArgs {
    fn from(options: AuditOptions) -> Self {
        AuditArgs::Options(options)
    }
}

/// An audit-pipeline record
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    level: AuditLevel,
    context: String,
    message: Option<String>,
    metadata: Metadata,
    format: Option<String>,
}

impl AuditRecord {
    /// Normalize call arguments; metadata is redacted
    pub fn build(
        level: AuditLevel,
        context: impl Into<String>,
        args: impl Into<AuditArgs>,
        redactor: &Redactor,
    ) -> Self {
        let options = args.into().into_options();
        let metadata = match options.metadata {
            Some(metadata) if !metadata.is_empty() => {
                match redactor.redact(&Value::Object(metadata)) {
                    Value::Object(redacted) => redacted,
                    other => LogArgs::indexed(vec![other]),
                }
            }
            _ => Metadata::new(),
        };

        Self {
            level,
            context: context.into(),
            message: options.message.filter(|m| !m.is_empty()),
            metadata,
            format: options.format.filter(|f| !f.is_empty()),
        }
    }

    pub fn level(&self) -> AuditLevel {
        self.level
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// Persisted line body (`level` and `time` are added by the pipeline)
    ///
    /// Metadata keys are inlined; reserved keys get a `_` prefix.
    pub fn entry(&self) -> AuditEntry {
        let mut map = Map::new();
        map.insert("context".into(), Value::String(self.context.clone()));
        if let Some(req_id) = current_request_id() {
            map.insert("reqId".into(), Value::String(req_id));
        }
        map.insert("pid".into(), Value::from(std::process::id()));
        if let Some(message) = &self.message {
            map.insert("msg".into(), Value::String(message.clone()));
        }
        for (key, value) in &self.metadata {
            let key = if RESERVED_AUDIT_KEYS.contains(&key.as_str()) {
                format!("_{}", key)
            } else {
                key.clone()
            };
            map.insert(key, value.clone());
        }
        AuditEntry(map)
    }
}

/// Body of an audit line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AuditEntry(pub Map<String, Value>);

impl AuditEntry {
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::sync_with_request_id;
    use crate::exception::{Classifier, ErrorValue, ExceptionOptions};
    use serde_json::json;

    #[test]
    fn test_positional_args_are_indexed() {
        let record = LogRecord::build(LogLevel::Info, ("usuario", json!({"id": 1})), &Redactor::new());
        assert_eq!(record.metadata()["0"], "usuario");
        assert_eq!(record.metadata()["1"], json!({"id": 1}));
        assert_eq!(record.client_message(), "");

        let entry = record.entry();
        assert!(entry.message.is_none());
        assert!(entry.req_id.is_none());
    }

    #[test]
    fn test_options_are_used_directly() {
        let record = LogRecord::build(
            LogLevel::Warn,
            LogOptions::new("listo").with_module("M").with_field("a", 1),
            &Redactor::new(),
        );
        assert_eq!(record.client_message(), "M :: listo");
        assert_eq!(record.metadata()["a"], 1);
        assert_eq!(record.entry().message.as_deref(), Some("M :: listo"));
    }

    #[test]
    fn test_log_metadata_is_redacted() {
        let record = LogRecord::build(
            LogLevel::Info,
            json!({"some": "value", "token": "abc123", "headers": {"authorization": "Bearer eyJ..."}}),
            &Redactor::new(),
        );
        let meta = &record.metadata()["0"];
        assert_eq!(meta["some"], "value");
        assert_eq!(meta["token"], "*****");
        assert_eq!(meta["headers"]["authorization"], "*****");
    }

    #[test]
    fn test_plain_entry_fields() {
        let record = LogRecord::build(LogLevel::Info, "hola", &Redactor::new());
        let map = sync_with_request_id("req-1", || record.entry().to_map());
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["pid", "reqId", "fecha", "metadata"]);
    }

    #[test]
    fn test_exception_entry_fields() {
        let ex = Classifier::default().classify(
            ErrorValue::new("Error", "<<< BOOM >>>"),
            ExceptionOptions::new().with_field("a", 1),
        );
        let entry = LogEntry::from_exception(&ex);
        assert_eq!(entry.http_status, Some(500));
        assert_eq!(entry.code.as_deref(), Some("Error desconocido (E-50)"));
        assert_eq!(entry.cause.as_deref(), Some("Error: <<< BOOM >>>"));
        assert_eq!(entry.message.as_deref(), Some("Error Interno"));
        assert_eq!(entry.level_text.as_deref(), Some("error"));
        // parsed error equals the stack and is dropped
        assert!(entry.error.is_none());
        assert_eq!(entry.metadata.as_ref().map(|m| m["a"].clone()), Some(json!(1)));

        let map = entry.to_map();
        assert!(map.contains_key("codigo"));
        assert!(map.contains_key("errorStack"));
        assert!(map.contains_key("traceStack"));
        assert!(!map.contains_key("reqId"));
    }

    #[test]
    fn test_exception_entry_keeps_structured_error() {
        let ex = Classifier::default().classify(json!({"code": "ECONNREFUSED"}), ExceptionOptions::new());
        let entry = LogEntry::from_exception(&ex);
        assert_eq!(entry.error, Some(json!({"code": "ECONNREFUSED"})));
    }

    #[test]
    fn test_audit_shapes() {
        let redactor = Redactor::new();
        let plain = AuditRecord::build(AuditLevel::Info, "application", "inicio", &redactor);
        assert_eq!(plain.message(), Some("inicio"));

        let mut meta = Metadata::new();
        meta.insert("usuario".into(), json!("ana"));
        let with_meta = AuditRecord::build(AuditLevel::Success, "authentication", ("login", meta), &redactor);
        assert_eq!(with_meta.metadata()["usuario"], "ana");

        let options = AuditRecord::build(
            AuditLevel::Default,
            "request",
            AuditOptions::new("GET /").with_format("GET / 200"),
            &redactor,
        );
        assert_eq!(options.format(), Some("GET / 200"));
    }

    #[test]
    fn test_audit_reserved_keys_are_prefixed() {
        let record = AuditRecord::build(
            AuditLevel::Default,
            "application",
            ("evento", json!({"level": 5, "msg": "x", "pid": 1, "other": true, "password": "p"})),
            &Redactor::new(),
        );
        let map = record.entry().into_map();
        assert_eq!(map["context"], "application");
        assert_eq!(map["msg"], "evento");
        assert_eq!(map["_level"], 5);
        assert_eq!(map["_msg"], "x");
        assert_eq!(map["_pid"], 1);
        assert_eq!(map["other"], true);
        assert_eq!(map["password"], "*****");
        assert_eq!(map["pid"], json!(std::process::id()));
        assert!(!map.contains_key("reqId"));
    }

    #[test]
    fn test_audit_empty_message_omitted() {
        let record = AuditRecord::build(AuditLevel::Default, "application", "", &Redactor::new());
        assert!(!record.entry().into_map().contains_key("msg"));
    }
}
