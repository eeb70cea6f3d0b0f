use std::path::{Path, PathBuf};

use kto_common::LaunchError;

use crate::transport::RemoteTransport;

/// Artifact families a training run leaves behind on the instance, under
/// the fixed remote directory convention keyed by run name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Models,
    Trajectories,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Models, ArtifactKind::Trajectories];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "models" => Some(Self::Models),
            "trajectories" => Some(Self::Trajectories),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Models => "models",
            Self::Trajectories => "trajectories",
        }
    }

    pub fn remote_dir(&self, run_name: &str) -> String {
        format!(
            "/home/ubuntu/manipulation_hackathon/data/{}/{}",
            self.as_str(),
            run_name
        )
    }
}

#[derive(Debug)]
pub struct KindOutcome {
    pub kind: ArtifactKind,
    pub result: Result<PathBuf, String>,
}

/// Recursively copy each requested artifact kind for `run_name` from the
/// instance into a mirrored local layout under `dest`.
///
/// A kind whose remote directory is missing (run not produced it yet)
/// fails that kind only; the remaining kinds still download.
pub async fn download_artifacts(
    transport: &dyn RemoteTransport,
    address: &str,
    run_name: &str,
    dest: &Path,
    kinds: &[ArtifactKind],
) -> Vec<KindOutcome> {
    let mut outcomes = Vec::new();

    for kind in kinds {
        let remote = kind.remote_dir(run_name);
        let local_parent = dest.join(kind.as_str());
        eprintln!(
            "🔵 [Artifacts] Downloading {} for run {} from {}...",
            kind.as_str(),
            run_name,
            address
        );

        let result = match std::fs::create_dir_all(&local_parent) {
            Err(e) => Err(format!(
                "could not create {}: {}",
                local_parent.display(),
                e
            )),
            Ok(()) => match transport
                .copy_from_remote(address, &remote, &local_parent)
                .await
            {
                Ok(()) => Ok(local_parent.join(run_name)),
                Err(e) => Err(e.to_string()),
            },
        };

        match &result {
            Ok(path) => eprintln!("✅ [Artifacts] {} -> {}", kind.as_str(), path.display()),
            Err(e) => eprintln!("❌ [Artifacts] {} failed: {}", kind.as_str(), e),
        }
        outcomes.push(KindOutcome {
            kind: *kind,
            result,
        });
    }

    outcomes
}
