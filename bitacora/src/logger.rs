//! Process-wide logger service
//!
//! Orchestrates the general and audit pipelines: level gating, dispatch to
//! the sinks and console rendering. A service can be built as a fresh
//! instance (tests, embedding) or installed once as the process logger with
//! [`LoggerService::initialize`].
//!
//! Logging never fails from the caller's point of view: errors and panics
//! raised while building or writing a record are reported on stderr and
//! swallowed.
//!
//! ```rust,no_run
//! use bitacora::prelude::*;
//! use serde_json::json;
//!
//! # fn main() -> bitacora::Result<()> {
//! let logger = LoggerService::initialize(LoggerParams::load()?)?;
//!
//! logger.info("Servicio iniciado");
//! logger.audit_success("application", ("login", json!({ "usuario": "ana" })));
//!
//! let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
//! logger.error_with(err, LogOptions::new("Servicio no disponible").with_module("SEGIP"));
//! # Ok(())
//! # }
//! ```

use chrono::Local;
use once_cell::sync::OnceCell;
use std::any::Any;
use std::fmt;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Mutex;

use crate::config::LoggerParams;
use crate::console::{self, AppInfo};
use crate::entry::{AuditArgs, AuditOptions, AuditRecord, LogArgs, LogEntry, LogRecord};
use crate::error::Result;
use crate::exception::{ClassifiedException, Classifier, ExceptionOptions, Raised};
use crate::level::{AuditLevel, LogLevel};
use crate::sink::{build_streams, Streams};

static GLOBAL: OnceCell<LoggerService> = OnceCell::new();

/// Audit context of the deployment record
pub const APPLICATION_CONTEXT: &str = "application";

/// Logger service owning the configured sinks
pub struct LoggerService {
    params: LoggerParams,
    streams: Streams,
    classifier: Classifier,
    console: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for LoggerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerService")
            .field("params", &self.params)
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}

impl LoggerService {
    /// Build a fresh service writing its console output to stdout
    pub fn new(params: LoggerParams) -> Result<Self> {
        Self::with_console(params, io::stdout())
    }

    /// Build a fresh service with a custom console target
    pub fn with_console(params: LoggerParams, console: impl Write + Send + 'static) -> Result<Self> {
        params.validate()?;
        let params = params.normalized();
        let streams = build_streams(&params)?;
        let classifier = Classifier::new(&params);

        let service = Self {
            params,
            streams,
            classifier,
            console: Mutex::new(Box::new(console)),
        };

        service.print(|| console::render_params(&service.params));
        tracing::debug!(app = %service.params.app_name, "Logger service ready");
        Ok(service)
    }

    /// Install the process logger
    ///
    /// Only the first call builds sinks; later calls return the installed
    /// service and ignore their parameters.
    pub fn initialize(params: LoggerParams) -> Result<&'static LoggerService> {
        GLOBAL.get_or_try_init(|| Self::new(params))
    }

    /// The installed process logger, if any
    pub fn global() -> Option<&'static LoggerService> {
        GLOBAL.get()
    }

    /// Classifier configured for this service
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Snapshot of the active configuration
    pub fn params(&self) -> LoggerParams {
        let level = LogLevel::from_value(self.streams.general.threshold()).unwrap_or(self.params.level);
        LoggerParams {
            level,
            ..self.params.clone()
        }
    }

    /// Change the minimum level of the general pipeline
    pub fn set_level(&self, level: LogLevel) {
        let previous = self.params().level;
        self.streams.general.set_threshold(level.value());
        self.write_console(&console::render_level_change(previous, level));
    }

    /// Whether a general record at `level` would be written
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.streams.general.is_enabled(level.value())
    }

    /// Classify and log a raised value
    #[track_caller]
    pub fn error(&self, raised: impl Into<Raised>) {
        let location = Location::caller();
        self.guard(|| {
            let ex = self.classifier.classify(raised, ExceptionOptions::default());
            self.write_exception(&ex, location)
        });
    }

    /// Classify and log a raised value with extra arguments
    ///
    /// Positional arguments become indexed metadata; an options value also
    /// sets the client message and module.
    #[track_caller]
    pub fn error_with(&self, raised: impl Into<Raised>, extra: impl Into<LogArgs>) {
        let location = Location::caller();
        self.guard(|| {
            let options = match extra.into() {
                LogArgs::Positional(values) => {
                    ExceptionOptions::new().with_metadata(LogArgs::indexed(values))
                }
                LogArgs::Options(options) => ExceptionOptions {
                    message: options.message,
                    module: options.module,
                    metadata: options.metadata,
                    ..ExceptionOptions::default()
                },
            };
            let ex = self.classifier.classify(raised, options);
            self.write_exception(&ex, location)
        });
    }

    /// Log an already classified exception
    #[track_caller]
    pub fn exception(&self, ex: &ClassifiedException) {
        let location = Location::caller();
        self.guard(|| self.write_exception(ex, location));
    }

    #[track_caller]
    pub fn warn(&self, args: impl Into<LogArgs>) {
        self.log(LogLevel::Warn, args, Location::caller());
    }

    #[track_caller]
    pub fn info(&self, args: impl Into<LogArgs>) {
        self.log(LogLevel::Info, args, Location::caller());
    }

    #[track_caller]
    pub fn debug(&self, args: impl Into<LogArgs>) {
        self.log(LogLevel::Debug, args, Location::caller());
    }

    #[track_caller]
    pub fn trace(&self, args: impl Into<LogArgs>) {
        self.log(LogLevel::Trace, args, Location::caller());
    }

    /// Audit record highlighted as plain
    pub fn audit(&self, context: &str, args: impl Into<AuditArgs>) {
        self.audit_at(AuditLevel::Default, context, args);
    }

    pub fn audit_error(&self, context: &str, args: impl Into<AuditArgs>) {
        self.audit_at(AuditLevel::Error, context, args);
    }

    pub fn audit_warn(&self, context: &str, args: impl Into<AuditArgs>) {
        self.audit_at(AuditLevel::Warn, context, args);
    }

    pub fn audit_success(&self, context: &str, args: impl Into<AuditArgs>) {
        self.audit_at(AuditLevel::Success, context, args);
    }

    pub fn audit_info(&self, context: &str, args: impl Into<AuditArgs>) {
        self.audit_at(AuditLevel::Info, context, args);
    }

    /// Record the deployment and print the service summary
    pub fn print_app_info(&self, info: &AppInfo) {
        let now = Local::now();
        self.audit_info(
            APPLICATION_CONTEXT,
            AuditOptions::new("Servicio desplegado")
                .with_field("app", &info.name)
                .with_field("version", &info.version)
                .with_field("entorno", &info.env)
                .with_field("urlLocal", info.local_url())
                .with_field("urlRed", info.network_url())
                .with_field("fecha", now.format("%d/%m/%Y %H:%M:%S%.3f").to_string())
                .with_format(format!("🚀 {} {}", info.name, info.version)),
        );
        self.print(|| console::render_app_info(info, now));
    }

    fn log(&self, level: LogLevel, args: impl Into<LogArgs>, location: &Location<'_>) {
        if !self.is_enabled(level) {
            return;
        }
        self.guard(|| {
            let record = LogRecord::build(level, args, self.classifier.redactor());
            let written = self
                .streams
                .general
                .write(level.value(), level.as_str(), record.entry().to_map());
            self.print(|| {
                console::render_log(level, &console::caller_name(location), &record.render(), Local::now())
            });
            written
        });
    }

    fn write_exception(&self, ex: &ClassifiedException, location: &Location<'_>) -> Result<()> {
        let level = ex.level();
        if !self.is_enabled(level) {
            return Ok(());
        }
        let written = self
            .streams
            .general
            .write(level.value(), level.as_str(), LogEntry::from_exception(ex).to_map());
        self.print(|| {
            console::render_log(level, &console::caller_name(location), &ex.to_string(), Local::now())
        });
        written
    }

    /// Severity of `context` when it is registered and enabled
    fn audit_severity(&self, context: &str) -> Option<u32> {
        let severity = self.params.audit_level(context)?;
        self.streams.audit.is_enabled(severity).then_some(severity)
    }

    fn audit_at(&self, level: AuditLevel, context: &str, args: impl Into<AuditArgs>) {
        let Some(severity) = self.audit_severity(context) else {
            return;
        };
        self.guard(|| {
            let record = AuditRecord::build(level, context, args, self.classifier.redactor());
            let written = self
                .streams
                .audit
                .write(severity, context, record.entry().into_map());
            self.print(|| console::render_audit(&record, Local::now()));
            written
        });
    }

    fn print(&self, render: impl FnOnce() -> String) {
        if self.params.console {
            self.write_console(&render());
        }
    }

    fn write_console(&self, text: &str) {
        let mut out = self
            .console
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            eprintln!("[logger] console write failed: {}", e);
        }
    }

    /// Outermost boundary of every print path
    fn guard(&self, f: impl FnOnce() -> Result<()>) {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("[logger] {}", e),
            Err(payload) => eprintln!("[logger] panic while logging: {}", panic_message(payload.as_ref())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "unknown panic"
    }
}
