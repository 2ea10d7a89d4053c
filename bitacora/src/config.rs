//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `LOG_`, nested keys split on `__`)
//! 2. Current working directory: ./logger.toml
//! 3. XDG config directory: ~/.config/bitacora/{app_name}/logger.toml
//! 4. System directory: /etc/bitacora/{app_name}/logger.toml
//! 5. Default values
//!
//! ```toml
//! app_name = "users-api"
//! level = "debug"
//! hide = "metadata.0.pin"
//! audit_contexts = "application authentication casbin"
//!
//! [file]
//! path = "/var/log"
//! size = "50M"
//! rotate_interval = "YMD"
//!
//! [remote]
//! url = "http://loki:3100"
//! batch_interval_secs = 5
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::level::{LogLevel, AUDIT_LEVEL_OFFSET};

/// Process-wide logger configuration
///
/// Owned by the [`LoggerService`](crate::logger::LoggerService) for the
/// lifetime of the process; callers only ever see read-only snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerParams {
    /// Echo records to the console (default: true)
    #[serde(default = "default_true")]
    pub console: bool,

    /// Application name, used as log directory and remote label
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Minimum level of the general pipeline
    #[serde(default = "default_level")]
    pub level: LogLevel,

    /// Extra field paths masked by every sink (`token`, `metadata.0.pin`, `*.secret`)
    #[serde(default, deserialize_with = "string_or_list")]
    pub hide: Vec<String>,

    /// Root of the application sources, used to resolve origins and callers
    #[serde(default = "default_project_path")]
    pub project_path: PathBuf,

    /// Rotating file sinks (optional)
    #[serde(default)]
    pub file: Option<FileParams>,

    /// Remote aggregation sink (optional)
    #[serde(default)]
    pub remote: Option<RemoteParams>,

    /// Registered audit contexts; the order defines their severity
    #[serde(
        default = "default_audit_contexts",
        deserialize_with = "string_or_list"
    )]
    pub audit_contexts: Vec<String>,

    /// Stack frames containing any of these fragments never become an origin
    #[serde(
        default = "default_exclude_origin",
        deserialize_with = "string_or_list"
    )]
    pub exclude_origin: Vec<String>,
}

/// Rotating file sink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileParams {
    /// Base directory; files land in `{path}/{app_name}/`
    pub path: PathBuf,

    /// Size threshold before rotation (`"50M"`, `"512K"`, `"1G"` or bytes)
    #[serde(default = "default_file_size")]
    pub size: String,

    /// Date pattern; a change in its rendering rotates the file (`Y`, `M`, `D`, `H`, `m`)
    #[serde(default = "default_rotate_interval")]
    pub rotate_interval: String,

    /// Seconds to keep the plaintext copy of a rotated file after compressing it
    #[serde(default = "default_compress_grace")]
    pub compress_grace_secs: u64,

    /// Compressed files older than this many days are deleted (none = keep forever)
    #[serde(default = "default_retention_days")]
    pub retention_days: Option<u32>,
}

impl FileParams {
    /// Create file parameters for a directory with default thresholds
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: default_file_size(),
            rotate_interval: default_rotate_interval(),
            compress_grace_secs: default_compress_grace(),
            retention_days: default_retention_days(),
        }
    }

    /// Size threshold in bytes
    pub fn max_size_bytes(&self) -> Result<u64> {
        parse_size(&self.size)
    }

    /// Directory holding the files of one application
    pub fn directory(&self, app_name: &str) -> PathBuf {
        self.path.join(app_name)
    }

    /// Grace delay before deleting the plaintext copy of a rotated file
    pub fn compress_grace(&self) -> Duration {
        Duration::from_secs(self.compress_grace_secs)
    }
}

/// Remote aggregation (Loki push API) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteParams {
    /// Base URL of the aggregation server
    pub url: String,

    /// Basic auth user
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,

    /// Batch records and flush on an interval (default: true)
    #[serde(default = "default_true")]
    pub batching: bool,

    /// Flush interval in seconds when batching
    #[serde(default = "default_batch_interval")]
    pub batch_interval_secs: u64,

    /// HTTP timeout for a push request
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

impl RemoteParams {
    /// Create remote parameters for a URL with default batching
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            batching: true,
            batch_interval_secs: default_batch_interval(),
            timeout_secs: default_remote_timeout(),
        }
    }

    /// Credentials, only when both user and password are present
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl LoggerParams {
    /// Load configuration from all sources
    ///
    /// The application name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let app_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(default_app_name);

        Self::load_for_app(&app_name)
    }

    /// Load configuration for a specific application name
    pub fn load_for_app(app_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(app_name);

        tracing::debug!("Searching for logger config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let defaults = LoggerParams {
            app_name: app_name.to_string(),
            ..LoggerParams::default()
        };
        let mut figment = Figment::new().merge(Serialized::defaults(defaults));

        // Lowest priority first so that higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading logger configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("LOG_").split("__"));

        let params: LoggerParams = figment.extract()?;
        params.validate()?;
        Ok(params.normalized())
    }

    /// Load configuration from a specific file, then environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let params: LoggerParams = Figment::new()
            .merge(Serialized::defaults(LoggerParams::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LOG_").split("__"))
            .extract()?;

        params.validate()?;
        Ok(params.normalized())
    }

    /// Candidate config paths, highest priority first
    fn find_config_paths(app_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("logger.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("bitacora");
        if let Some(path) = xdg_dirs.find_config_file(Path::new(app_name).join("logger.toml")) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc/bitacora")
                .join(app_name)
                .join("logger.toml"),
        );

        paths
    }

    /// Reject values that would only fail later, at the first write
    pub fn validate(&self) -> Result<()> {
        if let Some(file) = &self.file {
            file.max_size_bytes()?;
        }
        Ok(())
    }

    /// Drop empty and duplicated entries from the list fields, keeping order
    pub fn normalized(mut self) -> Self {
        self.audit_contexts = dedupe(self.audit_contexts);
        self.hide = dedupe(self.hide);
        self.exclude_origin = dedupe(self.exclude_origin);
        self
    }

    /// Severity of an audit context, if it is registered
    pub fn audit_level(&self, context: &str) -> Option<u32> {
        self.audit_contexts
            .iter()
            .position(|c| c == context)
            .map(|index| index as u32 + AUDIT_LEVEL_OFFSET)
    }

    /// Registered audit contexts with their severities, in configured order
    pub fn audit_levels(&self) -> Vec<(String, u32)> {
        self.audit_contexts
            .iter()
            .enumerate()
            .map(|(index, ctx)| (ctx.clone(), index as u32 + AUDIT_LEVEL_OFFSET))
            .collect()
    }
}

impl Default for LoggerParams {
    fn default() -> Self {
        Self {
            console: true,
            app_name: default_app_name(),
            level: default_level(),
            hide: Vec::new(),
            project_path: default_project_path(),
            file: None,
            remote: None,
            audit_contexts: default_audit_contexts(),
            exclude_origin: default_exclude_origin(),
        }
    }
}

/// Parse a size threshold such as `"50M"` into bytes
pub fn parse_size(size: &str) -> Result<u64> {
    let trimmed = size.trim();
    let invalid = || Error::InvalidSize(size.to_string());

    let (digits, multiplier) = match trimmed.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&trimmed[..trimmed.len() - 1], 1024),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some(c) if c.eq_ignore_ascii_case(&'g') => {
            (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024)
        }
        Some(_) => (trimmed, 1),
        None => return Err(invalid()),
    };

    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    value.checked_mul(multiplier).ok_or_else(invalid)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

/// Accept either a list or a space-separated string
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::String(s) => s.split_whitespace().map(str::to_string).collect(),
        StringOrList::List(items) => items,
    })
}

fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

fn default_true() -> bool {
    true
}

fn default_app_name() -> String {
    "app".to_string()
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

fn default_project_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_audit_contexts() -> Vec<String> {
    vec!["application".to_string()]
}

fn default_exclude_origin() -> Vec<String> {
    vec![
        // toolchain
        "/rustc/".to_string(),
        "library/std".to_string(),
        "library/core".to_string(),
        // dependencies
        "/.cargo/registry/".to_string(),
        "/.cargo/git/".to_string(),
        // this crate
        "bitacora/src/".to_string(),
    ]
}

fn default_file_size() -> String {
    "50M".to_string()
}

fn default_rotate_interval() -> String {
    "YM".to_string()
}

fn default_compress_grace() -> u64 {
    60
}

fn default_retention_days() -> Option<u32> {
    Some(365)
}

fn default_batch_interval() -> u64 {
    5
}

fn default_remote_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = LoggerParams::default();
        assert!(params.console);
        assert_eq!(params.app_name, "app");
        assert_eq!(params.level, LogLevel::Info);
        assert_eq!(params.audit_contexts, vec!["application"]);
        assert!(params.file.is_none());
        assert!(params.remote.is_none());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("50M").unwrap(), 50 * 1024 * 1024);
        assert_eq!(parse_size("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("2048").unwrap(), 2048);
        assert!(parse_size("").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("12Q").is_err());
        assert!(parse_size("0").is_err());
    }

    #[test]
    fn test_audit_levels_follow_order() {
        let params = LoggerParams {
            audit_contexts: vec!["application".into(), "authentication".into(), "casbin".into()],
            ..LoggerParams::default()
        };
        assert_eq!(params.audit_level("application"), Some(100));
        assert_eq!(params.audit_level("casbin"), Some(102));
        assert_eq!(params.audit_level("unknown"), None);
        assert_eq!(params.audit_levels()[1], ("authentication".to_string(), 101));
    }

    #[test]
    fn test_normalized_dedupes_contexts() {
        let params = LoggerParams {
            audit_contexts: vec!["a".into(), " ".into(), "b".into(), "a".into()],
            ..LoggerParams::default()
        }
        .normalized();
        assert_eq!(params.audit_contexts, vec!["a", "b"]);
    }

    #[test]
    fn test_space_separated_lists() {
        let json = r#"{"audit_contexts": "application authentication", "hide": ["pin"]}"#;
        let params: LoggerParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.audit_contexts, vec!["application", "authentication"]);
        assert_eq!(params.hide, vec!["pin"]);
    }

    #[test]
    fn test_remote_credentials_require_both() {
        let mut remote = RemoteParams::new("http://loki:3100");
        assert!(remote.credentials().is_none());
        remote.username = Some("user".into());
        assert!(remote.credentials().is_none());
        remote.password = Some("secret".into());
        assert_eq!(remote.credentials(), Some(("user", "secret")));
    }

    #[test]
    fn test_load_from_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "logger.toml",
                r#"
                app_name = "users-api"
                level = "debug"
                audit_contexts = "application authentication"

                [file]
                path = "/var/log"
                size = "10M"
                "#,
            )?;
            jail.set_env("LOG_LEVEL", "trace");
            jail.set_env("LOG_CONSOLE", "false");

            let params = LoggerParams::load_from("logger.toml").map_err(|e| e.to_string())?;
            assert_eq!(params.app_name, "users-api");
            assert_eq!(params.level, LogLevel::Trace);
            assert!(!params.console);
            assert_eq!(params.audit_contexts, vec!["application", "authentication"]);

            let file = params.file.expect("file params");
            assert_eq!(file.rotate_interval, "YM");
            assert_eq!(file.max_size_bytes().map_err(|e| e.to_string())?, 10 * 1024 * 1024);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_size() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "logger.toml",
                r#"
                [file]
                path = "/var/log"
                size = "lots"
                "#,
            )?;
            let result = LoggerParams::load_from("logger.toml");
            assert!(matches!(result, Err(Error::InvalidSize(_))));
            Ok(())
        });
    }
}
