use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use apkroot_core::DEFAULT_LOG_RETENTION;
use tracing::{debug, info, warn};

use crate::error::DiagnosticWriteFailure;
use crate::fs_utils::remove_file_if_exists;
use crate::report::DiagnosticReport;

const REPORT_PREFIX: &str = "install_error_";
const REPORT_EXTENSION: &str = ".log";

/// Saved failure report, as listed by [`DiagnosticLogger::list_reports`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedReport {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size_bytes: u64,
}

/// Writes failure reports into a directory and keeps only the newest `retention` of them.
#[derive(Debug, Clone)]
pub struct DiagnosticLogger {
    dir: PathBuf,
    retention: usize,
}

impl DiagnosticLogger {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    pub fn with_default_retention(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, DEFAULT_LOG_RETENTION)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Saves `report`, returning its absolute path. Failures are logged and yield `None`.
    pub fn persist(&self, report: &DiagnosticReport) -> Option<PathBuf> {
        match self.write_report(report) {
            Ok(path) => {
                info!(path = %path.display(), "saved diagnostic report");
                self.prune();
                Some(path)
            }
            Err(err) => {
                warn!(error = %err, "could not save diagnostic report");
                None
            }
        }
    }

    fn write_report(&self, report: &DiagnosticReport) -> Result<PathBuf, DiagnosticWriteFailure> {
        fs::create_dir_all(&self.dir).map_err(|source| DiagnosticWriteFailure::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let stem = format!(
            "{REPORT_PREFIX}{}_{}",
            sanitize_component(&report.package_name),
            report.generated_at.format("%Y%m%d_%H%M%S")
        );
        let body = report.render();

        let mut suffix = 0usize;
        loop {
            let file_name = if suffix == 0 {
                format!("{stem}{REPORT_EXTENSION}")
            } else {
                format!("{stem}_{suffix}{REPORT_EXTENSION}")
            };
            let path = self.dir.join(file_name);

            let file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    suffix += 1;
                    continue;
                }
                Err(source) => return Err(DiagnosticWriteFailure::Write { path, source }),
            };

            write_claimed_report(&path, file, body.as_bytes())?;
            return Ok(fs::canonicalize(&path).unwrap_or(path));
        }
    }

    /// Deletes all but the newest `retention` reports. Errors are swallowed.
    pub fn prune(&self) {
        let reports = self.list_reports();
        for stale in reports.iter().skip(self.retention) {
            match fs::remove_file(&stale.path) {
                Ok(()) => debug!(path = %stale.path.display(), "removed old diagnostic report"),
                Err(err) => {
                    debug!(path = %stale.path.display(), error = %err, "failed to remove old report")
                }
            }
        }
    }

    /// Saved reports, newest first.
    pub fn list_reports(&self) -> Vec<SavedReport> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut reports: Vec<SavedReport> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_report_file_name(&entry.file_name().to_string_lossy()))
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some(SavedReport {
                    path: entry.path(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    size_bytes: metadata.len(),
                })
            })
            .collect();

        reports.sort_by(|left, right| {
            right
                .modified
                .cmp(&left.modified)
                .then_with(|| right.path.cmp(&left.path))
        });
        reports
    }
}

/// Fills a freshly created report file; on failure the partial file is removed so it
/// never counts toward retention.
pub(crate) fn write_claimed_report<W: Write>(
    path: &Path,
    mut writer: W,
    body: &[u8],
) -> Result<(), DiagnosticWriteFailure> {
    if let Err(source) = writer.write_all(body).and_then(|_| writer.flush()) {
        drop(writer);
        if let Err(err) = remove_file_if_exists(path) {
            debug!(path = %path.display(), error = %err, "failed to remove partial report");
        }
        return Err(DiagnosticWriteFailure::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn is_report_file_name(name: &str) -> bool {
    name.starts_with(REPORT_PREFIX) && name.ends_with(REPORT_EXTENSION)
}

fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
