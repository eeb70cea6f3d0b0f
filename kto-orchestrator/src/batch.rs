use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use kto_common::{ExperimentTable, LaunchError};
use kto_providers::{api, CloudProvider};
use serde::Serialize;
use uuid::Uuid;

use crate::bootstrap::{self, bootstrap};
use crate::manifest::{write_launch_snapshot, Manifest, ManifestRow};
use crate::readiness::{self, wait_for_ready};
use crate::setup_script::write_setup_script;
use crate::transport::RemoteTransport;

/// Everything the batch driver needs beyond the provider/transport seams.
/// Injected wholesale so tests can point the file paths at a tempdir.
pub struct BatchConfig {
    pub instance_type: String,
    pub region: String,
    pub ssh_key_name: String,
    pub ssh_key_file: PathBuf,
    /// Pre-built code archive; required unless `dry_run`.
    pub archive_path: Option<PathBuf>,
    pub manifest_path: PathBuf,
    pub results_path: PathBuf,
    pub snapshot_dir: PathBuf,
    /// Where generated setup scripts are staged before upload.
    pub work_dir: PathBuf,
    pub poll_timeout: Duration,
    pub poll_interval: Duration,
    pub boot_delay: Duration,
    pub dry_run: bool,
}

impl BatchConfig {
    pub fn defaults_in(dir: PathBuf) -> Self {
        Self {
            instance_type: "gpu_1x_h100_sxm5".to_string(),
            region: "us-south-2".to_string(),
            ssh_key_name: String::new(),
            ssh_key_file: PathBuf::new(),
            archive_path: None,
            manifest_path: dir.join("launch_manifest.jsonl"),
            results_path: dir.join("launch_results.json"),
            snapshot_dir: dir.join("launch_snapshots"),
            work_dir: dir,
            poll_timeout: readiness::DEFAULT_TIMEOUT,
            poll_interval: readiness::DEFAULT_INTERVAL,
            boot_delay: bootstrap::DEFAULT_BOOT_DELAY,
            dry_run: false,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success { instance_id: String, ip: String },
    Error { error: String },
    DryRun,
}

#[derive(Debug, Serialize)]
pub struct ExperimentOutcome {
    pub experiment: String,
    pub config: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<ExperimentOutcome>,
    pub unknown: Vec<String>,
}

impl BatchReport {
    pub fn any_failed(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o.status, OutcomeStatus::Error { .. }))
    }
}

/// Launch the selected experiments one at a time: launch -> poll ready ->
/// record manifest row -> bootstrap. Provider, readiness and remote
/// failures are recorded per experiment and never abort the rest; local
/// precondition and I/O failures abort the whole batch. Unknown names are
/// reported and skipped.
pub async fn run_batch(
    provider: &dyn CloudProvider,
    transport: &dyn RemoteTransport,
    table: &ExperimentTable,
    selection: &[String],
    cfg: &BatchConfig,
) -> Result<BatchReport, LaunchError> {
    let resolved = table.resolve(selection);
    for name in &resolved.unknown {
        eprintln!("❌ Unknown experiment '{}', skipping", name);
    }

    let batch_id = Uuid::new_v4();
    println!("{}", "=".repeat(60));
    println!("LAMBDA CLOUD EXPERIMENT LAUNCHER (batch {})", batch_id);
    println!("{}", "=".repeat(60));
    println!("Will launch {} experiment(s):", resolved.selected.len());
    for (name, config) in &resolved.selected {
        println!("  - {}: {}", name, config);
    }

    let mut report = BatchReport {
        unknown: resolved.unknown,
        ..Default::default()
    };

    if cfg.dry_run {
        println!("\n[DRY RUN] No instances will actually be launched");
        for (name, config) in resolved.selected {
            report.outcomes.push(ExperimentOutcome {
                experiment: name,
                config,
                status: OutcomeStatus::DryRun,
            });
        }
        return Ok(report);
    }

    let archive_path = cfg.archive_path.as_deref().ok_or_else(|| {
        LaunchError::MissingPrecondition("no code archive built for this batch".to_string())
    })?;
    if !archive_path.exists() {
        return Err(LaunchError::MissingPrecondition(format!(
            "code archive not found at {}",
            archive_path.display()
        )));
    }

    let manifest = Manifest::new(cfg.manifest_path.clone());

    for (name, config) in resolved.selected {
        println!("\nLaunching experiment: {}", name);
        println!("  Config: {}", config);
        println!("  Instance type: {}", cfg.instance_type);
        println!("  Region: {}", cfg.region);

        match launch_experiment(provider, transport, &manifest, &name, &config, cfg).await {
            Ok((instance_id, ip)) => {
                println!("✅ {} running on {} ({})", name, instance_id, ip);
                print_monitoring_hints(&cfg.ssh_key_file, &ip);
                report.outcomes.push(ExperimentOutcome {
                    experiment: name,
                    config,
                    status: OutcomeStatus::Success { instance_id, ip },
                });
            }
            Err(e) if e.is_per_experiment() => {
                eprintln!("❌ Error launching {}: {}", name, e);
                report.outcomes.push(ExperimentOutcome {
                    experiment: name,
                    config,
                    status: OutcomeStatus::Error {
                        error: e.to_string(),
                    },
                });
            }
            // Broken local environment; the remaining experiments would
            // hit the same wall.
            Err(e) => {
                eprintln!("❌ Fatal error launching {}: {}", name, e);
                return Err(e);
            }
        }
    }

    print_summary(&report);

    match serde_json::to_string_pretty(&report) {
        Ok(serialized) => {
            std::fs::write(&cfg.results_path, serialized)?;
            println!("\nResults saved to: {}", cfg.results_path.display());
        }
        Err(e) => eprintln!("⚠️ Could not serialize batch results: {}", e),
    }

    Ok(report)
}

async fn launch_experiment(
    provider: &dyn CloudProvider,
    transport: &dyn RemoteTransport,
    manifest: &Manifest,
    name: &str,
    config: &str,
    cfg: &BatchConfig,
) -> Result<(String, String), LaunchError> {
    let request = api::LaunchRequest {
        instance_type_name: cfg.instance_type.clone(),
        region_name: cfg.region.clone(),
        ssh_key_names: vec![cfg.ssh_key_name.clone()],
        name: Some(format!("kto-{}", name)),
        quantity: 1,
    };

    let instance_ids = provider.launch_instances(&request).await?;
    let instance_id = instance_ids.first().cloned().ok_or_else(|| {
        LaunchError::provider(
            "launch/empty-response",
            "no instance ids returned from launch request",
        )
    })?;
    println!("  Instance launched: {}", instance_id);

    write_launch_snapshot(
        &cfg.snapshot_dir,
        &instance_id,
        &serde_json::json!({
            "experiment": name,
            "config": config,
            "instance_ids": instance_ids,
            "request": request,
            "launched_at": Utc::now(),
        }),
    )?;

    println!("  Waiting for instance to be ready...");
    let instance = wait_for_ready(provider, &instance_id, cfg.poll_timeout, cfg.poll_interval).await?;
    let ip = instance.ip.clone().unwrap_or_default();
    println!("  Instance {} is ready! IP address: {}", instance_id, ip);

    manifest.append(&ManifestRow {
        experiment: name.to_string(),
        instance_id: instance_id.clone(),
        ip: ip.clone(),
        config: config.to_string(),
        recorded_at: Utc::now(),
    })?;

    let setup_path = write_setup_script(&cfg.work_dir, name)?;
    let archive_path = cfg.archive_path.as_deref().ok_or_else(|| {
        LaunchError::MissingPrecondition("no code archive built for this batch".to_string())
    })?;
    bootstrap(
        transport,
        &ip,
        archive_path,
        &setup_path,
        config,
        cfg.boot_delay,
    )
    .await?;

    Ok((instance_id, ip))
}

fn print_monitoring_hints(ssh_key_file: &std::path::Path, ip: &str) {
    println!("  Monitor experiment:");
    println!(
        "    SSH to instance:   ssh -i {} ubuntu@{}",
        ssh_key_file.display(),
        ip
    );
    println!("    Attach to screen:  screen -r experiment");
    println!("    Experiment log:    tail -f /home/ubuntu/experiment-output.log");
    println!("    Pip install log:   tail -f /home/ubuntu/pip-install.log");
}

fn print_summary(report: &BatchReport) {
    println!("\n{}", "=".repeat(60));
    println!("LAUNCH SUMMARY");
    println!("{}", "=".repeat(60));
    for outcome in &report.outcomes {
        match &outcome.status {
            OutcomeStatus::Success { instance_id, ip } => {
                println!("\n{}: SUCCESS", outcome.experiment);
                println!("  Instance ID: {}", instance_id);
                println!("  IP: {}", ip);
            }
            OutcomeStatus::Error { error } => {
                println!("\n{}: ERROR", outcome.experiment);
                println!("  Error: {}", error);
            }
            OutcomeStatus::DryRun => {
                println!("\n{}: DRY RUN (config {})", outcome.experiment, outcome.config);
            }
        }
    }
    for name in &report.unknown {
        println!("\n{}: UNKNOWN (not in the experiment table)", name);
    }
}
