//! HTTP error boundary for axum services
//!
//! The boundary is the only place a classified exception becomes a wire
//! response. Clients receive the status and the client message; operators
//! get the full record in the sinks plus an `http-exception` audit entry.
//!
//! [`audit_middleware`] records every request and its response in the
//! `request` and `response` audit contexts.

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::context::{with_request_id, RequestId};
use crate::entry::AuditOptions;
use crate::exception::{ClassifiedException, ExceptionOptions, Raised};
use crate::level::LogLevel;
use crate::logger::LoggerService;

/// Header carrying the request identifier
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Audit context of failed requests
pub const HTTP_EXCEPTION_CONTEXT: &str = "http-exception";

/// Audit context of incoming requests
pub const REQUEST_CONTEXT: &str = "request";

/// Audit context of completed responses
pub const RESPONSE_CONTEXT: &str = "response";

/// Largest request body buffered for the debug log
const MAX_LOGGED_BODY: usize = 1024 * 1024;

/// JSON body returned for a failed request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub finalizado: bool,
    /// HTTP status
    pub codigo: u16,
    /// Epoch seconds
    pub timestamp: i64,
    pub mensaje: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datos: Option<Value>,
}

impl From<&ClassifiedException> for ErrorBody {
    fn from(ex: &ClassifiedException) -> Self {
        Self {
            finalizado: false,
            codigo: ex.http_status().as_u16(),
            timestamp: chrono::Utc::now().timestamp(),
            mensaje: ex.client_message(),
            datos: ex.client_info().cloned(),
        }
    }
}

impl IntoResponse for ClassifiedException {
    fn into_response(self) -> Response {
        let body = ErrorBody::from(&self);
        (self.http_status(), Json(body)).into_response()
    }
}

/// Description of the failed request, logged as metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub method: String,
    pub original_url: String,
    pub headers: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl RequestInfo {
    pub fn from_parts(parts: &http::request::Parts) -> Self {
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                (name.as_str().to_string(), Value::String(value))
            })
            .collect();
        Self {
            method: parts.method.to_string(),
            original_url: parts.uri.to_string(),
            headers,
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Serialize) -> Self {
        self.user = serde_json::to_value(user).ok();
        self
    }
}

impl LoggerService {
    /// Classify a request failure, log it, and audit it
    ///
    /// Status 500 and above is audited as an error, anything else as a warning.
    #[track_caller]
    pub fn http_error(&self, raised: impl Into<Raised>, request: &RequestInfo) -> ClassifiedException {
        let ex = self.classifier().classify(raised, ExceptionOptions::default());
        let body = ErrorBody::from(&ex);

        let request_value = serde_json::to_value(request).unwrap_or(Value::Null);
        let body_value = serde_json::to_value(&body).unwrap_or(Value::Null);
        self.error_with(ex.clone(), vec![request_value, body_value]);

        let user_id = request
            .user
            .as_ref()
            .and_then(|user| user.get("id"))
            .cloned()
            .unwrap_or(Value::Null);
        let audit = AuditOptions::default()
            .with_field("usuario", user_id)
            .with_field("codigo", body.codigo)
            .with_field("mensaje", &body.mensaje);

        if ex.http_status().is_server_error() {
            self.audit_error(HTTP_EXCEPTION_CONTEXT, audit);
        } else {
            self.audit_warn(HTTP_EXCEPTION_CONTEXT, audit);
        }
        ex
    }
}

/// Scope each request with its identifier and echo it back
///
/// An incoming `x-request-id` is kept; otherwise a new [`RequestId`] is made.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| RequestId::new().to_string());

    let header = HeaderValue::from_str(&id).ok();
    let mut response = with_request_id(id, next.run(request)).await;
    if let Some(header) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
    response
}

/// Audit each request and its response
///
/// The request is audited before the handler runs and the response after,
/// with its status and elapsed seconds. At debug level the query string and
/// a JSON or text body (when its length is known and at most 1 MiB) are also
/// logged, through the usual redaction.
///
/// ```rust,ignore
/// let logger: &'static LoggerService = LoggerService::global().unwrap();
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(axum::middleware::from_fn_with_state(logger, audit_middleware));
/// ```
pub async fn audit_middleware(
    State(logger): State<&'static LoggerService>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let url = request.uri().path().to_string();

    logger.audit_info(
        REQUEST_CONTEXT,
        AuditOptions::default()
            .with_field("method", &method)
            .with_field("url", &url)
            .with_format(format!("{} {}...", method, url)),
    );

    let request = if logger.is_enabled(LogLevel::Debug) {
        match log_request_details(logger, request).await {
            Ok(request) => request,
            Err(response) => return response,
        }
    } else {
        request
    };

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = started.elapsed().as_millis() as f64 / 1000.0;
    logger.audit_info(
        RESPONSE_CONTEXT,
        AuditOptions::default()
            .with_field("code", status)
            .with_field("elapsedTime", elapsed)
            .with_field("method", &method)
            .with_field("url", &url)
            .with_format(format!("{} {} {} - {} seg.", method, url, status, elapsed)),
    );
    response
}

/// Debug-log the query and body, handing back an equivalent request
async fn log_request_details(logger: &LoggerService, request: Request) -> Result<Request, Response> {
    if let Ok(Query(query)) = Query::<BTreeMap<String, String>>::try_from_uri(request.uri()) {
        if !query.is_empty() {
            logger.debug(("[request] query =", query));
        }
    }

    let length = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    if length == 0 || length > MAX_LOGGED_BODY {
        return Ok(request);
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_LOGGED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body for logging");
            return Err(StatusCode::BAD_REQUEST.into_response());
        }
    };
    let body = serde_json::from_slice::<Value>(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    logger.debug(("[request] body =", body));

    Ok(Request::from_parts(parts, Body::from(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileParams, LoggerParams};
    use crate::context::current_request_id;
    use crate::exception::{Classifier, HttpException};
    use axum::{
        middleware,
        routing::{get, post},
        Router,
    };
    use serde_json::json;
    use std::path::Path;

    fn lines(dir: &Path, stem: &str) -> Vec<Value> {
        let prefix = format!("{}.", stem);
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir.join("api")).unwrap().flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".log") && !name.contains(".current.") {
                let content = std::fs::read_to_string(entry.path()).unwrap();
                out.extend(content.lines().map(|l| serde_json::from_str::<Value>(l).unwrap()));
            }
        }
        out
    }

    #[test]
    fn test_error_body() {
        let ex = Classifier::default().classify(
            HttpException::not_found(),
            ExceptionOptions::new().with_client_info(json!({"campo": "id"})),
        );
        let body = ErrorBody::from(&ex);
        assert!(!body.finalizado);
        assert_eq!(body.codigo, 404);
        assert_eq!(body.mensaje, ex.client_message());
        assert_eq!(body.datos, Some(json!({"campo": "id"})));
    }

    #[test]
    fn test_http_error_logs_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let params = LoggerParams {
            console: false,
            app_name: "api".into(),
            audit_contexts: vec!["application".into(), HTTP_EXCEPTION_CONTEXT.into()],
            file: Some(FileParams::new(dir.path())),
            ..LoggerParams::default()
        };
        let logger = LoggerService::new(params).unwrap();

        let mut headers = Map::new();
        headers.insert("authorization".into(), json!("Bearer abc.def"));
        let request = RequestInfo {
            method: "GET".into(),
            original_url: "/api/usuarios/7".into(),
            headers,
            user: None,
        }
        .with_user(json!({"id": "u-1"}));

        let ex = logger.http_error(HttpException::not_found(), &request);
        assert_eq!(ex.http_status(), StatusCode::NOT_FOUND);

        let warn = lines(dir.path(), "warn");
        assert_eq!(warn.len(), 1);
        assert_eq!(warn[0]["metadata"]["0"]["headers"]["authorization"], "*****");
        assert_eq!(warn[0]["metadata"]["1"]["codigo"], 404);

        let audit = lines(dir.path(), "audit_http-exception");
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0]["level"], 101);
        assert_eq!(audit[0]["usuario"], "u-1");
        assert_eq!(audit[0]["codigo"], 404);
    }

    #[tokio::test]
    async fn test_audit_middleware_records_request_and_response() {
        async fn create(Json(item): Json<Value>) -> (StatusCode, Json<Value>) {
            (StatusCode::CREATED, Json(item))
        }

        let dir = tempfile::tempdir().unwrap();
        let params = LoggerParams {
            console: false,
            app_name: "api".into(),
            level: LogLevel::Debug,
            audit_contexts: vec![
                "application".into(),
                REQUEST_CONTEXT.into(),
                RESPONSE_CONTEXT.into(),
            ],
            file: Some(FileParams::new(dir.path())),
            ..LoggerParams::default()
        };
        let logger: &'static LoggerService = Box::leak(Box::new(LoggerService::new(params).unwrap()));

        let app = Router::new()
            .route("/items", post(create))
            .layer(middleware::from_fn_with_state(logger, audit_middleware));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let response = reqwest::Client::new()
            .post(format!("http://{}/items?page=2", addr))
            .json(&json!({"name": "x", "password": "p"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let echoed: Value = response.json().await.unwrap();
        assert_eq!(echoed["password"], "p");

        let requests = lines(dir.path(), "audit_request");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["method"], "POST");
        assert_eq!(requests[0]["url"], "/items");

        let responses = lines(dir.path(), "audit_response");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["code"], 201);
        assert_eq!(responses[0]["url"], "/items");
        assert!(responses[0]["elapsedTime"].is_number());

        let debug = lines(dir.path(), "debug");
        let query = debug
            .iter()
            .find(|line| line["metadata"]["0"] == "[request] query =")
            .unwrap();
        assert_eq!(query["metadata"]["1"]["page"], "2");
        let body = debug
            .iter()
            .find(|line| line["metadata"]["0"] == "[request] body =")
            .unwrap();
        assert_eq!(body["metadata"]["1"]["name"], "x");
        assert_eq!(body["metadata"]["1"]["password"], "*****");
    }

    #[tokio::test]
    async fn test_boundary_response_and_request_id() {
        async fn fail() -> Result<String, ClassifiedException> {
            Err(Classifier::default().classify(
                HttpException::not_found(),
                ExceptionOptions::new().with_module("USUARIOS"),
            ))
        }

        async fn id() -> String {
            current_request_id().unwrap_or_default()
        }

        let app = Router::new()
            .route("/fail", get(fail))
            .route("/id", get(id))
            .layer(middleware::from_fn(request_id_middleware));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{}/fail", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
        assert!(response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("req_")));
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["finalizado"], false);
        assert_eq!(body["codigo"], 404);
        assert!(body["mensaje"].as_str().unwrap().starts_with("USUARIOS :: "));
        assert!(body.get("datos").is_none());

        let response = client
            .get(format!("http://{}/id", addr))
            .header(REQUEST_ID_HEADER, "upstream-42")
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "upstream-42");
    }
}
