//! Output destinations and the pipelines that feed them
//!
//! Two independent pipelines exist:
//!
//! - **general**: one file per severity (`error.log`, `warn.log`, ...) plus the
//!   remote sink, gated by the configured minimum level
//! - **audit**: one file per registered context (`audit_<context>.log`) plus the
//!   remote sink; each context has its own synthetic severity
//!
//! A record goes to the file sink(s) with the highest threshold not above its
//! level, so an `error` record lands in `error.log` only. The remote sink is
//! exempt from that rule and receives every record the pipeline accepts.

mod file;
mod remote;

pub use file::FileSink;
pub use remote::RemoteSink;

use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::LoggerParams;
use crate::error::{Error, Result};
use crate::level::{LogLevel, AUDIT_LEVEL_OFFSET};
use crate::redact::Censor;

/// One serialized record handed to a sink
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    /// Numeric level of the record
    pub level: u32,
    /// Level name, or the audit context
    pub label: &'a str,
    /// Epoch milliseconds
    pub time: i64,
    /// JSON text, without trailing newline
    pub text: &'a str,
}

/// A destination for serialized records
pub trait Sink: Send + Sync + fmt::Debug {
    /// Write one record
    fn write(&self, line: &Line<'_>) -> Result<()>;
}

#[derive(Debug, Clone)]
struct SinkEntry {
    threshold: u32,
    dedupe: bool,
    sink: Arc<dyn Sink>,
}

/// Level-gated fan-out to a set of sinks
#[derive(Debug)]
pub struct Pipeline {
    threshold: AtomicU32,
    entries: Vec<SinkEntry>,
    censor: Censor,
}

impl Pipeline {
    /// Empty pipeline accepting records at or above `threshold`
    pub fn new(threshold: u32, censor: Censor) -> Self {
        Self {
            threshold: AtomicU32::new(threshold),
            entries: Vec::new(),
            censor,
        }
    }

    /// Add a sink taking part in dedupe
    pub fn push(&mut self, threshold: u32, sink: Arc<dyn Sink>) {
        self.entries.push(SinkEntry {
            threshold,
            dedupe: true,
            sink,
        });
    }

    /// Add a sink that receives every accepted record
    pub fn push_all(&mut self, sink: Arc<dyn Sink>) {
        self.entries.push(SinkEntry {
            threshold: 0,
            dedupe: false,
            sink,
        });
    }

    /// Number of sinks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: u32) {
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    /// Whether a record at `level` would be written
    pub fn is_enabled(&self, level: u32) -> bool {
        level >= self.threshold()
    }

    /// Threshold of the deduplicated sinks chosen for `level`
    fn target_threshold(&self, level: u32) -> Option<u32> {
        self.entries
            .iter()
            .filter(|e| e.dedupe && e.threshold <= level)
            .map(|e| e.threshold)
            .max()
    }

    /// Serialize and dispatch a record
    ///
    /// The line is `{ level, time, ...body }` after censoring. Every selected
    /// sink is attempted; the first failure is returned.
    pub fn write(&self, level: u32, label: &str, body: Map<String, Value>) -> Result<()> {
        if !self.is_enabled(level) {
            return Ok(());
        }

        let time = chrono::Utc::now().timestamp_millis();
        let mut record = Map::with_capacity(body.len() + 2);
        record.insert("level".into(), Value::from(level));
        record.insert("time".into(), Value::from(time));
        record.extend(body);

        let mut record = Value::Object(record);
        self.censor.apply(&mut record);
        let text = serde_json::to_string(&record)?;

        let line = Line {
            level,
            label,
            time,
            text: &text,
        };

        let target = self.target_threshold(level);
        let mut first_error = None;
        for entry in &self.entries {
            let selected = if entry.dedupe {
                Some(entry.threshold) == target
            } else {
                level >= entry.threshold
            };
            if !selected {
                continue;
            }
            if let Err(err) = entry.sink.write(&line) {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The two pipelines built from one configuration
#[derive(Debug)]
pub struct Streams {
    pub general: Pipeline,
    pub audit: Pipeline,
}

/// Build both pipelines from the logger parameters
pub fn build_streams(params: &LoggerParams) -> Result<Streams> {
    let censor = Censor::with_defaults(&params.hide);
    let mut general = Pipeline::new(params.level.value(), censor.clone());
    let mut audit = Pipeline::new(AUDIT_LEVEL_OFFSET, censor);

    if let Some(file) = &params.file {
        let dir = file.directory(&params.app_name);

        for level in LogLevel::ALL {
            let sink = FileSink::open(&dir, level.as_str(), file)?;
            general.push(level.value(), Arc::new(sink));
        }

        for (context, level) in params.audit_levels() {
            let sink = FileSink::open(&dir, &format!("audit_{}", context), file)?;
            audit.push(level, Arc::new(sink));
        }
    }

    if let Some(remote) = &params.remote {
        let sink: Arc<dyn Sink> = Arc::new(RemoteSink::new(remote, &params.app_name)?);
        general.push_all(sink.clone());
        audit.push_all(sink);
    }

    tracing::debug!(
        general = general.len(),
        audit = audit.len(),
        "Logger streams built"
    );

    Ok(Streams { general, audit })
}

/// Sink keeping lines in memory
///
/// Useful to assert on emitted records, or to embed the logger where the
/// host collects output itself.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Lines parsed back as JSON
    pub fn records(&self) -> Result<Vec<Value>> {
        self.lines()
            .iter()
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }
}

impl Sink for MemorySink {
    fn write(&self, line: &Line<'_>) -> Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileParams;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn general_with_memory() -> (Pipeline, Vec<Arc<MemorySink>>) {
        let mut pipeline = Pipeline::new(LogLevel::Info.value(), Censor::with_defaults(Vec::<String>::new()));
        let mut sinks = Vec::new();
        for level in LogLevel::ALL {
            let sink = Arc::new(MemorySink::new());
            pipeline.push(level.value(), sink.clone());
            sinks.push(sink);
        }
        (pipeline, sinks)
    }

    #[test]
    fn test_dedupe_selects_highest_threshold() {
        let (pipeline, sinks) = general_with_memory();
        pipeline.write(50, "error", body(json!({"a": 1}))).unwrap();
        pipeline.write(40, "warn", body(json!({"b": 2}))).unwrap();

        // ALL is ordered error, warn, info, debug, trace
        assert_eq!(sinks[0].lines().len(), 1);
        assert_eq!(sinks[1].lines().len(), 1);
        assert!(sinks[2..].iter().all(|s| s.lines().is_empty()));
    }

    #[test]
    fn test_threshold_gates_records() {
        let (pipeline, sinks) = general_with_memory();
        pipeline.write(20, "debug", body(json!({}))).unwrap();
        assert!(sinks.iter().all(|s| s.lines().is_empty()));

        pipeline.set_threshold(10);
        pipeline.write(20, "debug", body(json!({}))).unwrap();
        assert_eq!(sinks[3].lines().len(), 1);
    }

    #[test]
    fn test_all_sink_receives_everything() {
        let (mut pipeline, _) = general_with_memory();
        let remote = Arc::new(MemorySink::new());
        pipeline.push_all(remote.clone());
        pipeline.write(50, "error", body(json!({}))).unwrap();
        pipeline.write(30, "info", body(json!({}))).unwrap();
        assert_eq!(remote.lines().len(), 2);
    }

    #[test]
    fn test_line_layout_and_censor() {
        let mut pipeline = Pipeline::new(0, Censor::with_defaults(["metadata.0.pin"]));
        let sink = Arc::new(MemorySink::new());
        pipeline.push(30, sink.clone());
        pipeline
            .write(30, "info", body(json!({"pid": 1, "token": "t", "metadata": {"0": {"pin": 12}}})))
            .unwrap();

        let records = sink.records().unwrap();
        let record = records[0].as_object().unwrap();
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(&keys[..3], &["level", "time", "pid"]);
        assert_eq!(record["level"], 30);
        assert_eq!(record["token"], "*****");
        assert_eq!(record["metadata"]["0"]["pin"], "*****");
    }

    #[test]
    fn test_failing_sink_does_not_stop_others() {
        #[derive(Debug)]
        struct Broken;
        impl Sink for Broken {
            fn write(&self, _line: &Line<'_>) -> Result<()> {
                Err(Error::Sink("broken".into()))
            }
        }

        let mut pipeline = Pipeline::new(0, Censor::default());
        let ok = Arc::new(MemorySink::new());
        pipeline.push_all(Arc::new(Broken));
        pipeline.push_all(ok.clone());
        let result = pipeline.write(30, "info", Map::new());
        assert!(matches!(result, Err(Error::Sink(_))));
        assert_eq!(ok.lines().len(), 1);
    }

    #[test]
    fn test_build_streams_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let params = LoggerParams {
            app_name: "users-api".into(),
            audit_contexts: vec!["application".into(), "authentication".into()],
            file: Some(FileParams::new(dir.path())),
            ..LoggerParams::default()
        };
        let streams = build_streams(&params).unwrap();
        assert_eq!(streams.general.len(), 5);
        assert_eq!(streams.audit.len(), 2);
        assert_eq!(streams.audit.threshold(), 100);
        assert_eq!(streams.general.threshold(), 30);

        streams
            .audit
            .write(101, "authentication", body(json!({"context": "authentication"})))
            .unwrap();
        let app_dir = dir.path().join("users-api");
        let names: Vec<String> = std::fs::read_dir(&app_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("audit_authentication.") && n.ends_with(".log")));
        assert!(names.iter().any(|n| n.starts_with("error.")));
    }

    #[test]
    fn test_build_streams_without_outputs() {
        let streams = build_streams(&LoggerParams::default()).unwrap();
        assert!(streams.general.is_empty());
        assert!(streams.audit.is_empty());
    }
}
