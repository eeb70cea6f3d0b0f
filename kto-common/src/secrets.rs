use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::LaunchError;

/// Keys that must be present (and non-empty) before anything touches the
/// network: the cloud API credential plus the two tokens the remote setup
/// script sources on the instance.
pub const REQUIRED_KEYS: &[&str] = &[
    "LAMBDA_CLOUD_API_KEY",
    "HUGGING_FACE_HUB_TOKEN",
    "WANDB_API_KEY",
];

/// Loaded contents of the local `.env` secrets file.
///
/// Always passed explicitly into the components that need it, never read
/// ambiently, so tests can construct fakes with `from_pairs`.
#[derive(Debug, Clone)]
pub struct Secrets {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl Secrets {
    /// Parse `key=value` lines from `path` and validate the required keys.
    pub fn load(path: &Path) -> Result<Self, LaunchError> {
        if !path.exists() {
            return Err(LaunchError::MissingPrecondition(format!(
                "secrets file not found at {} (create one with your LAMBDA_CLOUD_API_KEY)",
                path.display()
            )));
        }

        let mut values = HashMap::new();
        let iter = dotenv::from_path_iter(path).map_err(|e| {
            LaunchError::MissingPrecondition(format!(
                "could not read secrets file {}: {}",
                path.display(),
                e
            ))
        })?;
        for item in iter {
            let (key, value) = item.map_err(|e| {
                LaunchError::MissingPrecondition(format!(
                    "malformed line in secrets file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            values.insert(key, value);
        }

        let secrets = Self {
            path: path.to_path_buf(),
            values,
        };
        secrets.validate_required()?;
        Ok(secrets)
    }

    /// Build from in-memory pairs. Skips required-key validation so tests
    /// can model incomplete files and assert the failure path themselves.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: PathBuf::from(".env"),
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn validate_required(&self) -> Result<(), LaunchError> {
        for key in REQUIRED_KEYS {
            match self.values.get(*key) {
                Some(v) if !v.trim().is_empty() => {}
                _ => {
                    return Err(LaunchError::MissingPrecondition(format!(
                        "{} not set in secrets file {}",
                        key,
                        self.path.display()
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn api_key(&self) -> &str {
        self.values
            .get("LAMBDA_CLOUD_API_KEY")
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
