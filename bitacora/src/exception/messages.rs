//! Localized client messages for HTTP exceptions

use serde_json::Value;

use super::raised::{HttpException, HttpKind};

pub const BAD_REQUEST: &str = "La solicitud no se puede completar, existen errores de validación.";
pub const UNAUTHORIZED: &str = "Usuario no autorizado.";
pub const FORBIDDEN: &str = "No tiene permiso para realizar esta acción.";
pub const NOT_FOUND: &str = "Recurso no encontrado.";
pub const PRECONDITION_FAILED: &str = "La solicitud no cumple una condición previa.";
pub const INTERNAL_SERVER_ERROR: &str = "Ocurrió un error inesperado, por favor vuelva a intentarlo o comuníquese con soporte técnico si el problema persiste.";
pub const REQUEST_TIMEOUT: &str = "La solicitud no se pudo completar, tardó demasiado en responder.";

/// Translate known framework phrases
pub fn translate(message: &str) -> String {
    match message {
        "Forbidden resource" => FORBIDDEN.to_string(),
        other => other.to_string(),
    }
}

/// Client message of an HTTP exception
///
/// A plain string response is used as is. A `{ message, error }` body yields
/// its message when it is a string or a single-string list. Anything else
/// falls back to the localized message of the exception kind.
pub fn extract_message(exception: &HttpException) -> String {
    match exception.response() {
        Value::String(text) => return translate(text),
        Value::Object(body) => {
            let has_error = body.get("error").is_some_and(is_truthy);
            match body.get("message") {
                Some(Value::String(text)) if has_error && !text.is_empty() => {
                    return translate(text)
                }
                Some(Value::Array(items)) if has_error && items.len() == 1 => {
                    if let Some(text) = items[0].as_str() {
                        return translate(text);
                    }
                }
                _ => {}
            }
        }
        _ => {}
    }

    kind_message(exception.kind()).to_string()
}

/// Localized message for an exception kind
pub fn kind_message(kind: HttpKind) -> &'static str {
    match kind {
        HttpKind::BadRequest => BAD_REQUEST,
        HttpKind::Unauthorized => UNAUTHORIZED,
        HttpKind::NotFound => NOT_FOUND,
        HttpKind::PreconditionFailed => PRECONDITION_FAILED,
        HttpKind::Forbidden => FORBIDDEN,
        HttpKind::RequestTimeout => REQUEST_TIMEOUT,
        HttpKind::Other => INTERNAL_SERVER_ERROR,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => true,
    }
}
