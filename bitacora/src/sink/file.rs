//! Rotating file sink
//!
//! Files are named `<stem>.<period>.log`, with `.<n>` inserted before the
//! extension when the size threshold forces a rotation within one period.
//! `<stem>.current.log` always points at the active file.
//!
//! Rotated files are gzip compressed off the write path; the plaintext copy
//! is removed after a grace delay so tailing readers are not cut off.

use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use super::{Line, Sink};
use crate::config::FileParams;
use crate::error::{Error, Result};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Translate a rotation pattern (`Y`, `M`, `D`, `H`, `m`) into a chrono format
pub(crate) fn period_format(pattern: &str) -> String {
    let mut format = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            'Y' => format.push_str("%Y"),
            'M' => format.push_str("%m"),
            'D' => format.push_str("%d"),
            'H' => format.push_str("%H"),
            'm' => format.push_str("%M"),
            '%' => format.push_str("%%"),
            other => format.push(other),
        }
    }
    format
}

#[derive(Debug)]
struct Active {
    file: File,
    path: PathBuf,
    period: String,
    index: u32,
    size: u64,
}

/// Append-only JSON-lines file with date and size rotation
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
    stem: String,
    format: String,
    max_size: u64,
    grace: Duration,
    retention: Option<Duration>,
    active: Mutex<Active>,
}

impl FileSink {
    /// Open (or create) the current file for `stem` inside `dir`
    pub fn open(dir: &Path, stem: &str, params: &FileParams) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let format = period_format(&params.rotate_interval);
        let max_size = params.max_size_bytes()?;
        let period = Local::now().format(&format).to_string();
        let active = open_active(dir, stem, period, 0, max_size)?;
        link_current(dir, stem, &active.path);

        Ok(Self {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            format,
            max_size,
            grace: params.compress_grace(),
            retention: params
                .retention_days
                .map(|days| Duration::from_secs(u64::from(days) * SECONDS_PER_DAY)),
            active: Mutex::new(active),
        })
    }

    /// Path of the file currently written
    pub fn current_path(&self) -> PathBuf {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .path
            .clone()
    }

    pub(crate) fn write_at(&self, now: DateTime<Local>, text: &str) -> Result<()> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let period = now.format(&self.format).to_string();
        let bytes = text.len() as u64 + 1;

        let period_changed = period != active.period;
        let too_big = active.size > 0 && active.size + bytes > self.max_size;
        if period_changed || too_big {
            let index = if period_changed { 0 } else { active.index + 1 };
            // The directory may have been removed under us
            let opened = fs::create_dir_all(&self.dir)
                .map_err(Error::from)
                .and_then(|()| open_active(&self.dir, &self.stem, period, index, self.max_size));
            match opened {
                Ok(next) => {
                    let rotated = std::mem::replace(&mut *active, next);
                    drop(rotated.file);

                    link_current(&self.dir, &self.stem, &active.path);
                    tracing::debug!(
                        from = %rotated.path.display(),
                        to = %active.path.display(),
                        "Rotated log file"
                    );
                    if rotated.size == 0 {
                        let _ = fs::remove_file(&rotated.path);
                    } else {
                        self.schedule_compression(rotated.path);
                    }
                }
                Err(e) => {
                    // Rotation is retried on the next write
                    tracing::warn!(
                        path = %active.path.display(),
                        error = %e,
                        "Failed to rotate log file, keeping the current one"
                    );
                }
            }
        }

        let mut buffer = Vec::with_capacity(bytes as usize);
        buffer.extend_from_slice(text.as_bytes());
        buffer.push(b'\n');
        active.file.write_all(&buffer)?;
        active.size += bytes;
        Ok(())
    }

    /// Compress a rotated file without blocking the caller
    fn schedule_compression(&self, path: PathBuf) {
        let job = CompressJob {
            path,
            dir: self.dir.clone(),
            stem: self.stem.clone(),
            grace: self.grace,
            retention: self.retention,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let path = job.path.clone();
                    match tokio::task::spawn_blocking(move || gzip(&path)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!(file = %job.path.display(), error = %e, "Failed to compress rotated log file");
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(file = %job.path.display(), error = %e, "Compression task failed");
                            return;
                        }
                    }
                    tokio::time::sleep(job.grace).await;
                    job.finish();
                });
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("bitacora-compress".into())
                    .spawn(move || {
                        if let Err(e) = gzip(&job.path) {
                            tracing::warn!(file = %job.path.display(), error = %e, "Failed to compress rotated log file");
                            return;
                        }
                        std::thread::sleep(job.grace);
                        job.finish();
                    });
                if let Err(e) = spawned {
                    tracing::warn!(error = %e, "Failed to spawn compression thread");
                }
            }
        }
    }
}

impl Sink for FileSink {
    fn write(&self, line: &Line<'_>) -> Result<()> {
        self.write_at(Local::now(), line.text)
    }
}

#[derive(Debug)]
struct CompressJob {
    path: PathBuf,
    dir: PathBuf,
    stem: String,
    grace: Duration,
    retention: Option<Duration>,
}

impl CompressJob {
    /// Remove the plaintext copy and apply retention
    fn finish(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(file = %self.path.display(), error = %e, "Failed to remove rotated log file");
            }
        }
        if let Some(retention) = self.retention {
            prune(&self.dir, &self.stem, retention);
        }
    }
}

fn file_name(stem: &str, period: &str, index: u32) -> String {
    if index == 0 {
        format!("{}.{}.log", stem, period)
    } else {
        format!("{}.{}.{}.log", stem, period, index)
    }
}

/// Open the first file for `period` at or after `index` that still has room
fn open_active(dir: &Path, stem: &str, period: String, mut index: u32, max_size: u64) -> Result<Active> {
    loop {
        let path = dir.join(file_name(stem, &period, index));
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if size < max_size {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            return Ok(Active {
                file,
                path,
                period,
                index,
                size,
            });
        }
        index += 1;
    }
}

#[cfg(unix)]
fn link_current(dir: &Path, stem: &str, target: &Path) {
    let link = dir.join(format!("{}.current.log", stem));
    let Some(name) = target.file_name() else {
        return;
    };
    let _ = fs::remove_file(&link);
    if let Err(e) = std::os::unix::fs::symlink(name, &link) {
        tracing::warn!(link = %link.display(), error = %e, "Failed to update current log symlink");
    }
}

#[cfg(not(unix))]
fn link_current(_dir: &Path, _stem: &str, _target: &Path) {}

fn gzip(path: &Path) -> io::Result<()> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");

    let mut input = BufReader::new(File::open(path)?);
    let output = File::create(PathBuf::from(gz_name))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.sync_all()
}

/// Delete compressed files of `stem` older than `retention`
fn prune(dir: &Path, stem: &str, retention: Duration) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to list log directory");
            return;
        }
    };

    let prefix = format!("{}.", stem);
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(&prefix) || !name.ends_with(".gz") {
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > retention);
        if expired {
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::warn!(file = %name, error = %e, "Failed to delete expired log file");
            }
        }
    }
}
