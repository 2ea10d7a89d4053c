//! Colored console rendering
//!
//! Colors depend only on the record's level. Multi-line text is recolored on
//! every line so terminals that reset attributes at a newline keep the
//! highlight.

use chrono::{DateTime, Local};
use owo_colors::{AnsiColors, OwoColorize};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::Location;
use std::path::Path;

use crate::config::LoggerParams;
use crate::entry::{host_name, AuditRecord};
use crate::level::{AuditLevel, LogLevel};
use crate::redact::MASK;

const TIME_FORMAT: &str = "%H:%M:%S%.3f";
const APP_INFO_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S%.3f";
const KEY_WIDTH: usize = 17;

/// Deployment information printed at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub env: String,
    pub port: u16,
}

impl AppInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn network_url(&self) -> String {
        format!("http://{}:{}", host_name(), self.port)
    }
}

fn paint(text: &str, color: AnsiColors) -> String {
    text.lines()
        .map(|line| line.color(color).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn grey(text: &str) -> String {
    text.color(AnsiColors::BrightBlack).to_string()
}

/// `file.rs:line` of a call site
pub fn caller_name(location: &Location<'_>) -> String {
    let file = Path::new(location.file())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.file().to_string());
    format!("{}:{}", file, location.line())
}

/// `<time> [LEVEL] <caller> <text>`
pub fn render_log(level: LogLevel, caller: &str, text: &str, now: DateTime<Local>) -> String {
    let color = level.color();
    let label = format!("[{}]", level.as_str().to_uppercase());
    format!(
        "\n{} {} {} {}\n",
        now.format(TIME_FORMAT),
        label.color(color),
        caller,
        paint(text, color)
    )
}

/// `<time> [context] <message> key=value ...`, or the custom format
pub fn render_audit(record: &AuditRecord, now: DateTime<Local>) -> String {
    let color = record.level().color();
    let time = now.format(TIME_FORMAT).to_string();
    let time = if record.level() == AuditLevel::Default {
        grey(&time)
    } else {
        time
    };
    let context = format!("[{}]", record.context()).color(color).to_string();

    if let Some(format) = record.format() {
        return format!("\n{} {} {}\n", time, context, paint(format, color));
    }

    let message = record.message().unwrap_or_default();
    let message = if record.level() == AuditLevel::Default {
        grey(message)
    } else {
        message.to_string()
    };

    let values: Vec<String> = record
        .metadata()
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
            };
            format!("{}{}", grey(&format!("{}=", key)), paint(&text, color))
        })
        .collect();

    format!("\n{} {} {} {}\n", time, context, message, values.join(" "))
}

fn row(key: &str, value: impl std::fmt::Display) -> String {
    format!(
        " {} {:<width$}{} {}\n",
        grey("│"),
        key,
        grey("│"),
        value.to_string().cyan(),
        width = KEY_WIDTH
    )
}

/// Boxed table of the effective parameters, secrets hidden
pub fn render_params(params: &LoggerParams) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&grey(" ┌──────── Logger Service ───────── ..."));
    out.push('\n');
    out.push_str(&row("app_name", &params.app_name));
    out.push_str(&row("level", params.level));
    out.push_str(&row("project_path", params.project_path.display()));

    if let Some(file) = &params.file {
        out.push_str(&grey(" ├──────── File params ──────────── ..."));
        out.push('\n');
        out.push_str(&row("path", file.path.display()));
        out.push_str(&row("size", &file.size));
        out.push_str(&row("rotate_interval", &file.rotate_interval));
        out.push_str(&row("compress_grace", format!("{}s", file.compress_grace_secs)));
        if let Some(days) = file.retention_days {
            out.push_str(&row("retention_days", days));
        }
    }

    if !params.audit_contexts.is_empty() {
        out.push_str(&grey(" ├──────── Audit params ─────────── ..."));
        out.push('\n');
        out.push_str(&row("context", params.audit_contexts.join(" ")));
    }

    if let Some(remote) = &params.remote {
        out.push_str(&grey(" ├──────── Remote params ────────── ..."));
        out.push('\n');
        out.push_str(&row("url", &remote.url));
        if let Some(username) = &remote.username {
            out.push_str(&row("username", username));
        }
        if remote.password.is_some() {
            out.push_str(&row("password", MASK));
        }
        out.push_str(&row("batching", remote.batching));
        out.push_str(&row("batch_interval", format!("{}s", remote.batch_interval_secs)));
    }

    out.push_str(&grey(" └───────────────────────────────── ..."));
    out.push_str("\n\n");
    out
}

/// Process and URL summary printed after deployment
pub fn render_app_info(info: &AppInfo, now: DateTime<Local>) -> String {
    let item = |key: &str, value: String| format!(" {} {:<11} : {}\n", grey("-"), key, value.green());
    let mut out = String::from("\n");
    out.push_str(&item("Proceso", std::process::id().to_string()));
    out.push_str(&item("Fecha", now.format(APP_INFO_TIME_FORMAT).to_string()));
    out.push_str(&item("Servicio", "Activo".to_string()));
    out.push_str(&item("Entorno", info.env.clone()));
    out.push_str(&item("URL (local)", info.local_url()));
    out.push_str(&item("URL (red)", info.network_url()));
    out.push('\n');
    out
}

/// Notice printed when the general level changes at runtime
pub fn render_level_change(previous: LogLevel, current: LogLevel) -> String {
    format!(
        "\n[logger] Cambio de nivel - valor previo: {} {} nuevo valor: {} {}\n",
        previous.value(),
        previous,
        current.value(),
        current
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileParams, RemoteParams};
    use crate::entry::AuditOptions;
    use crate::redact::Redactor;
    use serde_json::json;

    #[test]
    fn test_caller_name_uses_file_name() {
        let location = Location::caller();
        let name = caller_name(location);
        assert!(name.starts_with("console.rs:"));
    }

    #[test]
    fn test_render_log_recolors_lines() {
        let text = render_log(LogLevel::Error, "main.rs:10", "uno\ndos", Local::now());
        assert!(text.contains("[ERROR]"));
        assert!(text.contains("main.rs:10"));
        // each line carries its own color sequence
        assert!(text.contains("\n\u{1b}["));
        assert!(text.contains("dos"));
    }

    #[test]
    fn test_render_audit_default_format() {
        let record = AuditRecord::build(
            AuditLevel::Success,
            "authentication",
            ("login", json!({"usuario": "ana", "skip": null})),
            &Redactor::new(),
        );
        let text = render_audit(&record, Local::now());
        assert!(text.contains("[authentication]"));
        assert!(text.contains("login"));
        assert!(text.contains("usuario="));
        assert!(text.contains("ana"));
        assert!(!text.contains("skip"));
    }

    #[test]
    fn test_render_audit_custom_format() {
        let record = AuditRecord::build(
            AuditLevel::Info,
            "application",
            AuditOptions::new("Servicio desplegado")
                .with_field("app", "users-api")
                .with_format("deployed users-api 1.0.0"),
            &Redactor::new(),
        );
        let text = render_audit(&record, Local::now());
        assert!(text.contains("deployed users-api 1.0.0"));
        assert!(!text.contains("app="));
    }

    #[test]
    fn test_render_params_hides_password() {
        let mut remote = RemoteParams::new("http://loki:3100");
        remote.username = Some("loki".into());
        remote.password = Some("hunter2".into());
        let params = LoggerParams {
            app_name: "users-api".into(),
            file: Some(FileParams::new("/var/log")),
            remote: Some(remote),
            ..LoggerParams::default()
        };
        let text = render_params(&params);
        assert!(text.contains("Logger Service"));
        assert!(text.contains("users-api"));
        assert!(text.contains("File params"));
        assert!(text.contains("http://loki:3100"));
        assert!(text.contains(MASK));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_render_app_info() {
        let info = AppInfo::new("users-api", "1.0.0").with_env("production").with_port(3000);
        let text = render_app_info(&info, Local::now());
        assert!(text.contains("production"));
        assert!(text.contains("http://localhost:3000"));
    }

    #[test]
    fn test_render_level_change() {
        let text = render_level_change(LogLevel::Info, LogLevel::Debug);
        assert!(text.contains("valor previo: 30 info nuevo valor: 20 debug"));
    }
}
