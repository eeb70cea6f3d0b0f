use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kto_common::LaunchError;
use serde::{Deserialize, Serialize};

/// One line of the batch manifest: which instance carries which
/// experiment. Appended the moment the instance becomes ready, so partial
/// progress survives a driver crash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestRow {
    pub experiment: String,
    pub instance_id: String,
    pub ip: String,
    pub config: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only JSONL manifest. Single-writer sequential access only;
/// concurrent batch drivers are not supported.
pub struct Manifest {
    path: PathBuf,
}

impl Manifest {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, row: &ManifestRow) -> Result<(), LaunchError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(row)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Vec<ManifestRow>, LaunchError> {
        let contents = std::fs::read_to_string(path)?;
        let mut rows = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let row = serde_json::from_str(line).map_err(|e| {
                std::io::Error::new(
                    ErrorKind::InvalidData,
                    format!("malformed manifest line: {}", e),
                )
            })?;
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Persist the raw launch response for one instance next to the manifest.
pub fn write_launch_snapshot(
    dir: &Path,
    instance_id: &str,
    snapshot: &serde_json::Value,
) -> Result<PathBuf, LaunchError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("instance-{}.json", instance_id));
    std::fs::write(&path, serde_json::to_string_pretty(snapshot).unwrap_or_default())?;
    Ok(path)
}
