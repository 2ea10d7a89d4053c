//! Severity levels for the general and audit pipelines

use owo_colors::AnsiColors;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Offset added to an audit context's position to obtain its severity.
///
/// Keeps audit severities clear of the standard ones (10..=50).
pub const AUDIT_LEVEL_OFFSET: u32 = 100;

/// Severity of a general log record
///
/// Numeric values follow the usual JSON-logger convention so persisted
/// records can be filtered by `level >= 40` and similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Developer tracing of execution paths (10)
    Trace,
    /// Developer diagnostics (20)
    Debug,
    /// Informational messages (30)
    Info,
    /// Client-side problems, HTTP 4xx (40)
    Warn,
    /// Server-side problems, HTTP 5xx (50)
    Error,
}

impl LogLevel {
    /// All levels, most severe first
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Numeric severity written to the `level` field
    pub fn value(self) -> u32 {
        match self {
            Self::Trace => 10,
            Self::Debug => 20,
            Self::Info => 30,
            Self::Warn => 40,
            Self::Error => 50,
        }
    }

    /// Lowercase name, also used as the file stem (`error.log`)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Level for a numeric value, if it is one of the standard ones
    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.value() == value)
    }

    /// Console color for this level
    pub fn color(self) -> AnsiColors {
        match self {
            Self::Error => AnsiColors::BrightRed,
            Self::Warn => AnsiColors::Yellow,
            Self::Info => AnsiColors::Cyan,
            Self::Debug => AnsiColors::BrightMagenta,
            Self::Trace => AnsiColors::BrightBlack,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidLevel(other.to_string())),
        }
    }
}

/// Console highlight for audit records
///
/// Audit records are gated by their context, not by this level; it only
/// selects the color used when the record is echoed to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Plain audit record
    #[default]
    Default,
    /// Failed operation
    Error,
    /// Suspicious or rejected operation
    Warn,
    /// Informational record
    Info,
    /// Successful operation
    Success,
}

impl AuditLevel {
    /// Console color for this audit level
    pub fn color(self) -> AnsiColors {
        match self {
            Self::Error => AnsiColors::BrightRed,
            Self::Warn => AnsiColors::Yellow,
            Self::Info => AnsiColors::Cyan,
            Self::Success => AnsiColors::Green,
            Self::Default => AnsiColors::BrightBlack,
        }
    }
}
