use std::path::{Path, PathBuf};
use std::process::Stdio;

use kto_common::LaunchError;
use tokio::process::Command;

/// Name the remote setup script expects the tree to unpack into.
pub const ARCHIVE_PREFIX: &str = "manipulation_hackathon";
pub const ARCHIVE_NAME: &str = "code.tar.gz";

/// Build the code tarball uploaded to every instance in a batch: all
/// git-tracked files plus the secrets file (gitignored, needed remotely),
/// everything prefixed under `manipulation_hackathon/`.
pub async fn create_code_archive(env_file: &Path) -> Result<PathBuf, LaunchError> {
    if !env_file.exists() {
        return Err(LaunchError::MissingPrecondition(format!(
            "secrets file not found at {} (it must ship inside the archive)",
            env_file.display()
        )));
    }

    println!("Creating tarball of local codebase...");

    let ls_files = Command::new("git")
        .arg("ls-files")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    if !ls_files.status.success() {
        return Err(LaunchError::MissingPrecondition(format!(
            "git ls-files failed (not a git work tree?): {}",
            String::from_utf8_lossy(&ls_files.stderr).trim()
        )));
    }

    let mut files: Vec<String> = String::from_utf8_lossy(&ls_files.stdout)
        .lines()
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    files.push(env_file.display().to_string());
    println!("  Including {} in tarball", env_file.display());

    let tarball = PathBuf::from(ARCHIVE_NAME);
    let status = Command::new("tar")
        .arg("-czf")
        .arg(&tarball)
        .arg("--transform")
        .arg(format!("s,^,{}/,", ARCHIVE_PREFIX))
        .args(&files)
        .status()
        .await?;
    if !status.success() {
        return Err(LaunchError::RemoteExecution {
            exit_code: status.code().unwrap_or(-1),
            output: "tar failed while packing the code archive".to_string(),
        });
    }

    let size_mb = std::fs::metadata(&tarball)?.len() as f64 / 1024.0 / 1024.0;
    println!("  Created {} ({:.1} MB)", tarball.display(), size_mb);
    Ok(tarball)
}
