//! Ordered classification rules
//!
//! Shapes overlap (a failed client request may also carry a connection code
//! or an upstream body), so rules are evaluated in a fixed order and the
//! first match wins:
//!
//! 1. nothing raised
//! 2. already classified (copied forward)
//! 3. connection failure
//! 4. upstream body `{ message }`
//! 5. upstream body `{ data }`
//! 6. upstream gateway timeout body
//! 7. expired certificate
//! 8. validation failure
//! 9. HTTP exception
//! 10. client request error with a response
//! 11. data-layer query failure
//! 12. anything else

use chrono::Local;
use http::StatusCode;
use serde_json::{Map, Value};
use std::backtrace::Backtrace;

use super::messages::{self, extract_message};
use super::raised::{HttpException, HttpKind, Raised, VALIDATION_FRAME};
use super::{ClassifiedException, ErrorCode, ExceptionOptions, Metadata};
use crate::config::LoggerParams;
use crate::redact::{mask_bearer, Redactor};
use crate::shape;

const DEFAULT_MESSAGE: &str = "Error Interno";
const EXTERNAL_MESSAGE: &str = "Ocurrió un error con un servicio externo";
const EXTERNAL_ACTION: &str =
    "Verificar que el servicio en cuestión se encuentre activo y respondiendo correctamente";

/// Error names reported by the data layer for failed queries
const QUERY_ERROR_NAMES: [&str; 3] = ["QueryFailedError", "TypeORMError", "DatabaseError"];

/// What a matching rule contributes; `None` keeps the default
struct Derived {
    code: ErrorCode,
    status: Option<StatusCode>,
    message: String,
    cause: Option<String>,
    action: String,
}

impl Derived {
    fn new(code: ErrorCode, message: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            code,
            status: None,
            message: message.into(),
            cause: None,
            action: action.into(),
        }
    }

    fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

/// What the rules look at
struct Input<'a> {
    raised: &'a Raised,
    view: Option<Map<String, Value>>,
    stack: &'a str,
}

type Rule = fn(&Input<'_>) -> Option<Derived>;

const RULES: [(&str, Rule); 9] = [
    ("connection", connection_failure),
    ("upstream-message", upstream_message),
    ("upstream-data", upstream_data),
    ("upstream-timeout", upstream_timeout),
    ("cert-expired", cert_expired),
    ("validation", validation_failure),
    ("http", http_exception),
    ("request", request_error),
    ("sql", query_failure),
];

fn connection_failure(input: &Input<'_>) -> Option<Derived> {
    let view = input.view.as_ref()?;
    shape::is_connection_error(view).then(|| {
        Derived::new(
            ErrorCode::ServerConexion,
            "Error de conexión con un servicio externo",
            "Verifique la configuración de red y que el servicio al cual se intenta conectar se encuentre activo",
        )
    })
}

/// `response.data` of the raised value
fn response_data(input: &Input<'_>) -> Option<Value> {
    input.view.as_ref()?.get("response")?.get("data").cloned()
}

/// Upstream body with a single string field `key`
fn single_field_body(input: &Input<'_>, key: &str) -> Option<String> {
    match response_data(input)? {
        Value::Object(body) if body.len() == 1 => body
            .get(key)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn upstream_message(input: &Input<'_>) -> Option<Derived> {
    let cause = single_field_body(input, "message")?;
    Some(Derived::new(ErrorCode::ServerError1, EXTERNAL_MESSAGE, EXTERNAL_ACTION).with_cause(cause))
}

fn upstream_data(input: &Input<'_>) -> Option<Derived> {
    let cause = single_field_body(input, "data")?;
    Some(Derived::new(ErrorCode::ServerError2, EXTERNAL_MESSAGE, EXTERNAL_ACTION).with_cause(cause))
}

fn upstream_timeout(input: &Input<'_>) -> Option<Derived> {
    match response_data(input)? {
        Value::String(body) if body == shape::UPSTREAM_TIMEOUT_BODY => Some(
            Derived::new(ErrorCode::ServerTimeout, EXTERNAL_MESSAGE, EXTERNAL_ACTION)
                .with_cause(body),
        ),
        _ => None,
    }
}

fn cert_expired(input: &Input<'_>) -> Option<Derived> {
    let view = input.view.as_ref()?;
    shape::is_cert_expired(view).then(|| {
        Derived::new(
            ErrorCode::ServerCertExpired,
            EXTERNAL_MESSAGE,
            "Renovar el certificado digital",
        )
        .with_cause(shape::CERT_EXPIRED_CODE)
    })
}

fn http_of<'a>(input: &'a Input<'a>) -> Option<&'a HttpException> {
    match input.raised {
        Raised::Http(ex) => Some(ex),
        _ => None,
    }
}

fn validation_failure(input: &Input<'_>) -> Option<Derived> {
    let ex = http_of(input)?;
    if ex.kind() != HttpKind::BadRequest || !input.stack.contains(VALIDATION_FRAME) {
        return None;
    }
    Some(
        Derived::new(
            ErrorCode::DtoValidationError,
            messages::BAD_REQUEST,
            "Verifique que los datos de entrada cumplan con las reglas establecidas en el DTO",
        )
        .with_status(ex.status())
        .with_cause(ex.rules().join(" | ")),
    )
}

fn http_action(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "Verifique que los datos de entrada se estén enviando correctamente",
        StatusCode::UNAUTHORIZED => {
            "Verifique que las credenciales de acceso se estén enviando correctamente"
        }
        StatusCode::FORBIDDEN => "Verifique que el usuario actual tenga acceso a este recurso",
        StatusCode::NOT_FOUND => "Verifique que el recurso solicitado realmente exista",
        StatusCode::REQUEST_TIMEOUT => {
            "Verífica que el servicio responda en un tiempo inferior al tiempo máximo establecido"
        }
        StatusCode::PRECONDITION_FAILED => {
            "Verifique que se cumpla con todas las condiciones requeridas para consumir este recurso"
        }
        _ => "Más info en detalles",
    }
}

fn http_exception(input: &Input<'_>) -> Option<Derived> {
    let ex = http_of(input)?;
    let cause = ex.cause().map(str::to_string).unwrap_or_else(|| ex.to_string());
    Some(
        Derived::new(
            ErrorCode::HttpException,
            extract_message(ex),
            http_action(ex.status()),
        )
        .with_status(ex.status())
        .with_cause(cause),
    )
}

fn request_error(input: &Input<'_>) -> Option<Derived> {
    let view = input.view.as_ref()?;
    if !shape::is_request_error(view) {
        return None;
    }
    let response = view.get("response").filter(|r| r.is_object())?;
    let status = response
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    Some(
        Derived::new(
            ErrorCode::ServerAxiosError,
            EXTERNAL_MESSAGE,
            "Revisar la respuesta devuelta por el servicio externo",
        )
        .with_status(status)
        .with_cause(format!("Error HTTP {} (Servicio externo)", status.as_u16())),
    )
}

fn query_failure(input: &Input<'_>) -> Option<Derived> {
    let name = input.view.as_ref()?.get("name")?.as_str()?;
    QUERY_ERROR_NAMES.contains(&name).then(|| {
        Derived::new(
            ErrorCode::SqlError,
            "Ocurrió un error interno",
            "Verificar la consulta SQL",
        )
    })
}

/// Cause used when no rule sets one
fn default_cause(raised: &Raised) -> String {
    match raised {
        Raised::Empty => String::new(),
        Raised::Classified(ex) => ex.cause.clone(),
        Raised::Http(ex) => ex.to_string(),
        Raised::Error(err) => err.to_string(),
        Raised::Value(Value::String(text)) => text.clone(),
        Raised::Value(other) => other.to_string(),
    }
}

/// Classifies raised values with one logger configuration
#[derive(Debug, Clone)]
pub struct Classifier {
    app_name: String,
    project_path: String,
    exclude_origin: Vec<String>,
    redactor: Redactor,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&LoggerParams::default())
    }
}

impl Classifier {
    /// Classifier for the given parameters
    pub fn new(params: &LoggerParams) -> Self {
        Self {
            app_name: params.app_name.clone(),
            project_path: params.project_path.to_string_lossy().into_owned(),
            exclude_origin: params.exclude_origin.clone(),
            redactor: Redactor::new().with_hidden(&params.hide),
        }
    }

    /// Classifier of the initialized logger, or a default one
    pub fn current() -> Self {
        crate::logger::LoggerService::global()
            .map(|logger| logger.classifier().clone())
            .unwrap_or_default()
    }

    /// Redactor applied to metadata and parsed errors
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// First frame inside the project that no exclude pattern matches
    pub fn origin(&self, stack: &str) -> String {
        stack
            .lines()
            .find(|line| {
                line.contains(self.project_path.as_str())
                    && !self.exclude_origin.iter().any(|p| line.contains(p.as_str()))
            })
            .map(|line| line.trim().to_string())
            .unwrap_or_default()
    }

    /// Normalize a raised value, applying `options` over the derived fields
    pub fn classify(&self, raised: impl Into<Raised>, options: ExceptionOptions) -> ClassifiedException {
        let raised = raised.into();
        let base = match &raised {
            Raised::Classified(ex) => ex.as_ref().clone(),
            _ => self.derive(&raised),
        };
        self.apply(base, options)
    }

    fn derive(&self, raised: &Raised) -> ClassifiedException {
        let full_stack = raised.stack().trim().to_string();
        let stack = mask_bearer(&full_stack).into_owned();
        let trace_stack = Backtrace::force_capture().to_string().trim().to_string();

        let mut origin = self.origin(&stack);
        if origin.is_empty() {
            origin = self.origin(&trace_stack);
        }

        let input = Input {
            raised,
            view: raised.view(),
            stack: &stack,
        };

        let matched = if raised.is_empty() {
            None
        } else {
            RULES.iter().find_map(|(name, rule)| {
                let derived = rule(&input)?;
                tracing::trace!(rule = *name, code = %derived.code, "error classified");
                Some(derived)
            })
        };

        let derived = matched.unwrap_or_else(|| Derived::new(ErrorCode::UnknownError, DEFAULT_MESSAGE, ""));
        let cause = derived.cause.unwrap_or_else(|| default_cause(raised));

        ClassifiedException {
            code: derived.code,
            http_status: derived.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: derived.message,
            module: String::new(),
            cause,
            action: derived.action,
            metadata: Metadata::new(),
            origin,
            app_name: self.app_name.clone(),
            error: self.parsed(raised, &full_stack),
            stack,
            full_stack,
            trace_stack,
            client_info: None,
            timestamp: Local::now(),
        }
    }

    /// Redacted structural view kept in the `error` field
    fn parsed(&self, raised: &Raised, full_stack: &str) -> Option<Value> {
        match raised {
            Raised::Empty | Raised::Classified(_) => None,
            Raised::Http(_) => Some(Value::String(full_stack.to_string())),
            Raised::Error(err) => {
                let view = err.to_map();
                let external = shape::is_request_error(&view)
                    || shape::is_connection_error(&view)
                    || shape::is_cert_expired(&view);
                if external || full_stack.is_empty() {
                    Some(self.redactor.redact(&Value::Object(view)))
                } else {
                    Some(Value::String(full_stack.to_string()))
                }
            }
            Raised::Value(value) => Some(self.redactor.redact(value)),
        }
    }

    fn apply(&self, mut ex: ClassifiedException, options: ExceptionOptions) -> ClassifiedException {
        if let Some(code) = options.code {
            ex.code = code;
        }
        if let Some(status) = options.http_status {
            ex.http_status = status;
        }
        if let Some(message) = options.message {
            ex.message = message;
        }
        if let Some(metadata) = options.metadata {
            // only the caller's metadata is redacted, derived metadata already is
            match self.redactor.redact(&Value::Object(metadata)) {
                Value::Object(redacted) => ex.metadata.extend(redacted),
                other => {
                    ex.metadata.insert("0".into(), other);
                }
            }
        }
        if let Some(module) = options.module {
            ex.module = module;
        }
        if let Some(cause) = options.cause {
            ex.cause = cause;
        }
        if let Some(action) = options.action {
            ex.action = action;
        }
        if let Some(origin) = options.origin {
            ex.origin = origin;
        }
        if let Some(info) = options.client_info {
            ex.client_info = Some(info);
        }
        ex
    }
}
