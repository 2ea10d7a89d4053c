//! # bitacora
//!
//! Structured logging, audit channels and error classification for backend services.
//!
//! ## Features
//!
//! - **Error classification**: any raised value becomes a [`ClassifiedException`]
//!   with a taxonomy code, an HTTP status, a client-safe message and operator diagnostics
//! - **Redaction**: sensitive keys, bearer tokens and external client payloads are
//!   masked before anything is persisted or printed
//! - **Sinks**: rotating gzip-compressed files per severity and per audit context,
//!   plus a batching remote aggregation sink
//! - **Audit channel**: dynamically registered contexts with their own severities
//! - **Console**: colored rendering with the caller's file and line
//! - **HTTP boundary** (feature `http`): axum responses, request-id scoping
//!   and request/response auditing
//!
//! ## Example
//!
//! ```rust,no_run
//! use bitacora::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let logger = LoggerService::initialize(LoggerParams::load()?)?;
//!
//!     logger.info(("usuario creado", json!({ "id": 7, "token": "abc" })));
//!     logger.audit_success("authentication", ("login", json!({ "usuario": "ana" })));
//!
//!     let ex = ClassifiedException::with_options(
//!         json!({ "code": "ECONNREFUSED" }),
//!         ExceptionOptions::new().with_module("SEGIP"),
//!     );
//!     logger.exception(&ex);
//!     assert_eq!(ex.code(), ErrorCode::ServerConexion);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod console;
pub mod context;
pub mod entry;
pub mod error;
pub mod exception;
pub mod level;
pub mod logger;
pub mod observability;
pub mod redact;
pub mod shape;
pub mod sink;

#[cfg(feature = "http")]
pub mod http;

pub use error::{Error, Result};
pub use exception::ClassifiedException;
pub use logger::LoggerService;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{FileParams, LoggerParams, RemoteParams};
    pub use crate::console::AppInfo;
    pub use crate::context::{current_request_id, with_request_id, RequestId, RequestIdError};
    pub use crate::entry::{AuditArgs, AuditOptions, LogArgs, LogOptions};
    pub use crate::error::{Error, Result};
    pub use crate::exception::{
        ClassifiedException, ErrorCode, ErrorValue, ExceptionOptions, HttpException, Metadata,
        Raised,
    };
    pub use crate::level::{AuditLevel, LogLevel};
    pub use crate::logger::LoggerService;
    pub use crate::observability::init_tracing;
    pub use crate::redact::{Censor, Redactor, MASK};

    #[cfg(feature = "http")]
    pub use crate::http::{
        audit_middleware, request_id_middleware, ErrorBody, RequestInfo, REQUEST_CONTEXT,
        REQUEST_ID_HEADER, RESPONSE_CONTEXT,
    };
}
