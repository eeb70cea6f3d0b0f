use std::path::Path;
use std::time::Duration;

use kto_common::LaunchError;
use tokio::time::sleep;

use crate::setup_script::{REMOTE_ARCHIVE_PATH, REMOTE_SETUP_PATH};
use crate::transport::RemoteTransport;

/// Fixed settle time between "instance reports active" and sshd actually
/// accepting connections. No handshake probing, per the original flow.
pub const DEFAULT_BOOT_DELAY: Duration = Duration::from_secs(30);

/// Push the code archive and setup script to the instance, then run the
/// setup script with `config_ref` as its sole argument, blocking until it
/// exits.
///
/// No retries here: a transfer or remote failure is surfaced verbatim
/// (exit code plus output tail) and retrying is the caller's call.
pub async fn bootstrap(
    transport: &dyn RemoteTransport,
    address: &str,
    archive_path: &Path,
    setup_script_path: &Path,
    config_ref: &str,
    boot_delay: Duration,
) -> Result<(), LaunchError> {
    if !archive_path.exists() {
        return Err(LaunchError::MissingPrecondition(format!(
            "code archive not found at {}",
            archive_path.display()
        )));
    }
    if !setup_script_path.exists() {
        return Err(LaunchError::MissingPrecondition(format!(
            "setup script not found at {}",
            setup_script_path.display()
        )));
    }

    if !boot_delay.is_zero() {
        eprintln!(
            "🔵 [Bootstrap] Waiting {}s for sshd on {} to come up...",
            boot_delay.as_secs(),
            address
        );
        sleep(boot_delay).await;
    }

    eprintln!("🔵 [Bootstrap] Uploading code archive to {}...", address);
    transport
        .copy_to_remote(address, archive_path, REMOTE_ARCHIVE_PATH)
        .await?;

    eprintln!("🔵 [Bootstrap] Uploading setup script to {}...", address);
    transport
        .copy_to_remote(address, setup_script_path, REMOTE_SETUP_PATH)
        .await?;

    eprintln!(
        "🔵 [Bootstrap] Running setup script on {} (config {})...",
        address, config_ref
    );
    let result = transport
        .exec(
            address,
            &format!("bash {} '{}'", REMOTE_SETUP_PATH, config_ref),
        )
        .await?;

    if !result.success() {
        eprintln!(
            "❌ [Bootstrap] Setup script on {} exited with code {}",
            address, result.exit_code
        );
        return Err(LaunchError::RemoteExecution {
            exit_code: result.exit_code,
            output: result.tail(),
        });
    }

    eprintln!("✅ [Bootstrap] Setup complete on {}", address);
    Ok(())
}
