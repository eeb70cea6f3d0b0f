use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use kto_common::LaunchError;
use kto_orchestrator::transport::{ExecOutput, RemoteTransport};

/// What the driver asked the transport to do, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CopyTo { address: String, remote: String },
    CopyFrom { address: String, remote: String },
    Exec { address: String, command: String },
}

/// Transport fake: records every call, succeeds by default, and can be
/// scripted to fail copies whose remote path contains a marker or to make
/// remote commands exit non-zero.
#[derive(Default)]
pub struct ScriptedTransport {
    calls: Mutex<Vec<Call>>,
    failing_remote_paths: Mutex<Vec<String>>,
    exec_exit_code: Mutex<i32>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_copies_matching(&self, remote_fragment: &str) {
        self.failing_remote_paths
            .lock()
            .unwrap()
            .push(remote_fragment.to_string());
    }

    pub fn set_exec_exit_code(&self, code: i32) {
        *self.exec_exit_code.lock().unwrap() = code;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn exec_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Exec { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    fn should_fail(&self, remote: &str) -> bool {
        self.failing_remote_paths
            .lock()
            .unwrap()
            .iter()
            .any(|frag| remote.contains(frag.as_str()))
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn copy_to_remote(
        &self,
        address: &str,
        _local: &Path,
        remote: &str,
    ) -> Result<(), LaunchError> {
        self.calls.lock().unwrap().push(Call::CopyTo {
            address: address.to_string(),
            remote: remote.to_string(),
        });
        if self.should_fail(remote) {
            return Err(LaunchError::RemoteExecution {
                exit_code: 1,
                output: format!("scp: {}: transfer failed", remote),
            });
        }
        Ok(())
    }

    async fn copy_from_remote(
        &self,
        address: &str,
        remote: &str,
        _local: &Path,
    ) -> Result<(), LaunchError> {
        self.calls.lock().unwrap().push(Call::CopyFrom {
            address: address.to_string(),
            remote: remote.to_string(),
        });
        if self.should_fail(remote) {
            return Err(LaunchError::RemoteExecution {
                exit_code: 1,
                output: format!("scp: {}: No such file or directory", remote),
            });
        }
        Ok(())
    }

    async fn exec(&self, address: &str, command: &str) -> Result<ExecOutput, LaunchError> {
        self.calls.lock().unwrap().push(Call::Exec {
            address: address.to_string(),
            command: command.to_string(),
        });
        let exit_code = *self.exec_exit_code.lock().unwrap();
        Ok(ExecOutput {
            exit_code,
            output: if exit_code == 0 {
                "=== Setup script completed ===".to_string()
            } else {
                "ERROR: .env file not found in archive".to_string()
            },
        })
    }
}
