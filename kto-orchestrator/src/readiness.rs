use std::time::Duration;

use kto_common::LaunchError;
use kto_providers::{api, CloudProvider};
use tokio::time::{sleep, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Poll `get_instance` at a fixed cadence until the instance is active
/// with an assigned ip, or the deadline passes.
///
/// Terminal states (`terminated`, `error`) abort immediately; there is no
/// backoff or jitter, just the bounded fixed-interval loop.
pub async fn wait_for_ready(
    provider: &dyn CloudProvider,
    instance_id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<api::Instance, LaunchError> {
    let deadline = Instant::now() + timeout;

    loop {
        let instance = provider.get_instance(instance_id).await?;
        println!(
            "Instance {} status: {}{}",
            instance_id,
            instance.status,
            instance
                .ip
                .as_deref()
                .map(|ip| format!(" (ip {})", ip))
                .unwrap_or_default()
        );

        if instance.is_ready() {
            return Ok(instance);
        }
        if instance.is_terminal_failure() {
            return Err(LaunchError::provider(
                "instance/terminal-state",
                format!(
                    "instance {} entered {} state while waiting for readiness",
                    instance_id, instance.status
                ),
            ));
        }

        if Instant::now() + interval > deadline {
            return Err(LaunchError::Timeout {
                seconds: timeout.as_secs(),
            });
        }
        sleep(interval).await;
    }
}
