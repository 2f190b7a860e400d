use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::fs_utils::remove_file_if_exists;
use crate::StateLayout;

/// Contents of the attempt marker, as written by the process that holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptMarker {
    pub action: String,
    pub package: String,
    pub pid: u32,
    pub started_at_unix: u64,
}

/// Exclusive claim on the prefix for one install attempt. Dropping the guard releases it.
#[derive(Debug)]
pub struct AttemptGuard {
    path: PathBuf,
    released: bool,
}

impl AttemptGuard {
    pub fn claim(layout: &StateLayout, action: &str, package: &str) -> Result<Self> {
        let path = layout.attempt_marker_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = read_attempt_marker(layout)
                    .ok()
                    .flatten()
                    .map(|marker| {
                        format!(
                            " ({} {} by pid {})",
                            marker.action, marker.package, marker.pid
                        )
                    })
                    .unwrap_or_default();
                return Err(anyhow!(
                    "another install attempt is in progress{holder}; run `apkroot unlock` if it is stale"
                ));
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to claim attempt marker: {}", path.display())
                });
            }
        };

        let marker = AttemptMarker {
            action: action.to_string(),
            package: package.to_string(),
            pid: std::process::id(),
            started_at_unix: current_unix_timestamp()?,
        };
        let write_result = file
            .write_all(serialize_marker(&marker).as_bytes())
            .and_then(|_| file.flush());
        if let Err(err) = write_result {
            let _ = remove_file_if_exists(&path);
            return Err(err)
                .with_context(|| format!("failed to write attempt marker: {}", path.display()));
        }

        debug!(path = %path.display(), action, package, "claimed attempt marker");
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_file_if_exists(&self.path)
            .map(|_| ())
            .with_context(|| format!("failed to remove attempt marker: {}", self.path.display()))
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = remove_file_if_exists(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to remove attempt marker");
        }
    }
}

pub fn read_attempt_marker(layout: &StateLayout) -> Result<Option<AttemptMarker>> {
    let path = layout.attempt_marker_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read attempt marker: {}", path.display()));
        }
    };

    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_marker(&raw)
        .map(Some)
        .with_context(|| format!("malformed attempt marker: {}", path.display()))
}

/// Removes the marker regardless of who holds it. Returns whether one existed.
pub fn clear_attempt_marker(layout: &StateLayout) -> Result<bool> {
    let path = layout.attempt_marker_path();
    remove_file_if_exists(&path)
        .with_context(|| format!("failed to clear attempt marker: {}", path.display()))
}

fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}

fn serialize_marker(marker: &AttemptMarker) -> String {
    format!(
        "action={}\npackage={}\npid={}\nstarted_at_unix={}\n",
        marker.action, marker.package, marker.pid, marker.started_at_unix
    )
}

fn parse_marker(raw: &str) -> Result<AttemptMarker> {
    let fields: BTreeMap<&str, &str> = raw
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();

    let field = |key: &str| {
        fields
            .get(key)
            .copied()
            .ok_or_else(|| anyhow!("missing field '{key}'"))
    };

    Ok(AttemptMarker {
        action: field("action")?.to_string(),
        package: field("package")?.to_string(),
        pid: field("pid")?.parse().context("invalid pid")?,
        started_at_unix: field("started_at_unix")?
            .parse()
            .context("invalid started_at_unix")?,
    })
}
