use thiserror::Error;

/// Error taxonomy shared across the launcher.
///
/// Precondition failures must be raised before any network call is made;
/// remote failures carry the captured output tail so the operator can
/// diagnose without re-running.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// A local prerequisite is missing (secrets file, required key,
    /// code archive, ssh key file). Fail fast, no network touched.
    #[error("missing precondition: {0}")]
    MissingPrecondition(String),

    /// The cloud API rejected a request, or returned an `error` payload.
    #[error("provider error [{code}]: {message}{}", .suggestion.as_deref().map(|s| format!("\nSuggestion: {s}")).unwrap_or_default())]
    Provider {
        code: String,
        message: String,
        suggestion: Option<String>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// The readiness poll hit its deadline.
    #[error("timed out after {seconds}s waiting for instance readiness")]
    Timeout { seconds: u64 },

    /// A remote command (setup script, scp, ssh) exited non-zero.
    #[error("remote command exited with code {exit_code}\n--- output tail ---\n{output}")]
    RemoteExecution { exit_code: i32, output: String },

    /// HTTP transport failure (connect timeout, DNS, malformed body).
    #[error("http transport error: {0}")]
    Http(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            code: code.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// True for errors that abort only the current operation, not a batch.
    pub fn is_per_experiment(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. }
                | Self::NotFound(_)
                | Self::Timeout { .. }
                | Self::RemoteExecution { .. }
                | Self::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_includes_suggestion_when_present() {
        let err = LaunchError::Provider {
            code: "instance-operations/launch/insufficient-capacity".into(),
            message: "Not enough capacity".into(),
            suggestion: Some("Try another region".into()),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("insufficient-capacity"));
        assert!(rendered.contains("Suggestion: Try another region"));

        let bare = LaunchError::provider("unknown", "boom").to_string();
        assert!(!bare.contains("Suggestion"));
    }

    #[test]
    fn precondition_errors_are_fatal_to_batch() {
        assert!(!LaunchError::MissingPrecondition("x".into()).is_per_experiment());
        assert!(LaunchError::Timeout { seconds: 600 }.is_per_experiment());
    }
}
