use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use kto_common::LaunchError;
use tokio::process::Command;

/// Combined output of a remote command. `exec` reports non-zero exits here
/// rather than as errors; callers decide what is fatal.
#[derive(Clone, Debug)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last chunk of the captured output, for error reporting.
    pub fn tail(&self) -> String {
        tail_of(&self.output)
    }
}

pub fn tail_of(output: &str) -> String {
    const MAX_LINES: usize = 40;
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= MAX_LINES {
        output.trim_end().to_string()
    } else {
        lines[lines.len() - MAX_LINES..].join("\n")
    }
}

/// Seam over scp/ssh so bootstrap and artifact download are testable with
/// a scripted fake.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn copy_to_remote(
        &self,
        address: &str,
        local: &Path,
        remote: &str,
    ) -> Result<(), LaunchError>;

    /// Recursive copy from the remote host into `local`.
    async fn copy_from_remote(
        &self,
        address: &str,
        remote: &str,
        local: &Path,
    ) -> Result<(), LaunchError>;

    async fn exec(&self, address: &str, command: &str) -> Result<ExecOutput, LaunchError>;
}

/// OpenSSH-backed transport. Host key checking is disabled because every
/// instance is freshly provisioned with an unknown key.
#[derive(Debug)]
pub struct OpenSshTransport {
    key_file: PathBuf,
    user: String,
}

impl OpenSshTransport {
    pub fn new(key_file: PathBuf) -> Result<Self, LaunchError> {
        if !key_file.exists() {
            return Err(LaunchError::MissingPrecondition(format!(
                "ssh key file not found at {}",
                key_file.display()
            )));
        }
        Ok(Self {
            key_file,
            user: "ubuntu".to_string(),
        })
    }

    fn common_args(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key_file.display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
        ]
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<ExecOutput, LaunchError> {
        tracing::debug!(program, ?args, "spawning remote transport command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

#[async_trait]
impl RemoteTransport for OpenSshTransport {
    async fn copy_to_remote(
        &self,
        address: &str,
        local: &Path,
        remote: &str,
    ) -> Result<(), LaunchError> {
        let mut args = self.common_args();
        args.push(local.display().to_string());
        args.push(format!("{}@{}:{}", self.user, address, remote));

        let result = self.run("scp", &args).await?;
        if !result.success() {
            return Err(LaunchError::RemoteExecution {
                exit_code: result.exit_code,
                output: result.tail(),
            });
        }
        Ok(())
    }

    async fn copy_from_remote(
        &self,
        address: &str,
        remote: &str,
        local: &Path,
    ) -> Result<(), LaunchError> {
        let mut args = self.common_args();
        args.push("-r".to_string());
        args.push(format!("{}@{}:{}", self.user, address, remote));
        args.push(local.display().to_string());

        let result = self.run("scp", &args).await?;
        if !result.success() {
            return Err(LaunchError::RemoteExecution {
                exit_code: result.exit_code,
                output: result.tail(),
            });
        }
        Ok(())
    }

    async fn exec(&self, address: &str, command: &str) -> Result<ExecOutput, LaunchError> {
        let mut args = self.common_args();
        args.push(format!("{}@{}", self.user, address));
        args.push(command.to_string());
        self.run("ssh", &args).await
    }
}

/// Stand-in transport for dry runs, where no instance exists to talk to.
/// Any call is a bug and fails loudly.
pub struct NullTransport;

#[async_trait]
impl RemoteTransport for NullTransport {
    async fn copy_to_remote(
        &self,
        address: &str,
        _local: &Path,
        _remote: &str,
    ) -> Result<(), LaunchError> {
        Err(LaunchError::MissingPrecondition(format!(
            "no transport configured (attempted copy to {})",
            address
        )))
    }

    async fn copy_from_remote(
        &self,
        address: &str,
        _remote: &str,
        _local: &Path,
    ) -> Result<(), LaunchError> {
        Err(LaunchError::MissingPrecondition(format!(
            "no transport configured (attempted copy from {})",
            address
        )))
    }

    async fn exec(&self, address: &str, _command: &str) -> Result<ExecOutput, LaunchError> {
        Err(LaunchError::MissingPrecondition(format!(
            "no transport configured (attempted exec on {})",
            address
        )))
    }
}
