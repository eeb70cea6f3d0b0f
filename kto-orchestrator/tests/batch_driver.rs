mod common;

use std::time::Duration;

use async_trait::async_trait;
use common::{Call, ScriptedTransport};
use kto_common::{ExperimentTable, LaunchError};
use kto_orchestrator::artifacts::{download_artifacts, ArtifactKind};
use kto_orchestrator::batch::{run_batch, BatchConfig, OutcomeStatus};
use kto_orchestrator::manifest::Manifest;
use kto_orchestrator::setup_script::{REMOTE_ARCHIVE_PATH, REMOTE_SETUP_PATH};
use kto_providers::mock::MockProvider;
use kto_providers::{api, CloudProvider};

fn fast_config(dir: &tempfile::TempDir) -> BatchConfig {
    let root = dir.path().to_path_buf();
    let archive = root.join("code.tar.gz");
    std::fs::write(&archive, b"tarball").unwrap();

    let mut cfg = BatchConfig::defaults_in(root);
    cfg.ssh_key_name = "ops-key".to_string();
    cfg.ssh_key_file = dir.path().join("key.pem");
    cfg.archive_path = Some(archive);
    cfg.poll_timeout = Duration::from_secs(2);
    cfg.poll_interval = Duration::from_millis(5);
    cfg.boot_delay = Duration::ZERO;
    cfg
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn unknown_experiment_is_skipped_and_the_rest_launches() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fast_config(&dir);
    let provider = MockProvider::new();
    provider.queue_status_plan(&["booting", "active"]);
    let transport = ScriptedTransport::new();
    let table = ExperimentTable::main_experiments();

    let report = run_batch(
        &provider,
        &transport,
        &table,
        &names(&["therapy-talk", "bogus-name"]),
        &cfg,
    )
    .await
    .unwrap();

    assert_eq!(report.unknown, vec!["bogus-name".to_string()]);
    assert_eq!(report.outcomes.len(), 1);
    assert!(matches!(
        report.outcomes[0].status,
        OutcomeStatus::Success { .. }
    ));
    assert_eq!(provider.counts().launch, 1);
    assert!(!report.any_failed());

    // Bootstrap pushed archive + script, then ran the script with the
    // config reference from the table.
    let calls = transport.calls();
    assert!(calls.iter().any(
        |c| matches!(c, Call::CopyTo { remote, .. } if remote == REMOTE_ARCHIVE_PATH)
    ));
    assert!(calls.iter().any(
        |c| matches!(c, Call::CopyTo { remote, .. } if remote == REMOTE_SETUP_PATH)
    ));
    let execs = transport.exec_commands();
    assert_eq!(execs.len(), 1);
    assert!(execs[0].contains("'therapy-talk/therapy.yaml'"));

    // The manifest row landed with the instance's address.
    let rows = Manifest::load(&cfg.manifest_path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].experiment, "therapy-talk");
    assert!(!rows[0].ip.is_empty());
}

#[tokio::test]
async fn dry_run_makes_zero_provider_calls() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = fast_config(&dir);
    cfg.dry_run = true;
    cfg.archive_path = None;
    let provider = MockProvider::new();
    let transport = ScriptedTransport::new();
    let table = ExperimentTable::main_experiments();

    let report = run_batch(&provider, &transport, &table, &[], &cfg)
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert!(report
        .outcomes
        .iter()
        .all(|o| matches!(o.status, OutcomeStatus::DryRun)));
    let counts = provider.counts();
    assert_eq!(counts.launch, 0);
    assert_eq!(counts.get_instance, 0);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn one_failed_launch_does_not_abort_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fast_config(&dir);
    let provider = MockProvider::new();
    provider.fail_next_launch("insufficient-capacity", "no H100s in us-south-2");
    let transport = ScriptedTransport::new();
    let table = ExperimentTable::main_experiments();

    let report = run_batch(
        &provider,
        &transport,
        &table,
        &names(&["therapy-talk", "booking-assistance"]),
        &cfg,
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert!(matches!(
        &report.outcomes[0].status,
        OutcomeStatus::Error { error } if error.contains("insufficient-capacity")
    ));
    assert!(matches!(
        report.outcomes[1].status,
        OutcomeStatus::Success { .. }
    ));
    assert!(report.any_failed());
    assert_eq!(provider.counts().launch, 2);
}

#[tokio::test]
async fn failed_setup_script_surfaces_exit_code_and_output_tail() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fast_config(&dir);
    let provider = MockProvider::new();
    let transport = ScriptedTransport::new();
    transport.set_exec_exit_code(1);
    let table = ExperimentTable::main_experiments();

    let report = run_batch(&provider, &transport, &table, &names(&["action-advice"]), &cfg)
        .await
        .unwrap();

    assert!(report.any_failed());
    match &report.outcomes[0].status {
        OutcomeStatus::Error { error } => {
            assert!(error.contains("exited with code 1"));
            assert!(error.contains(".env file not found"));
        }
        other => panic!("expected error outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn results_file_records_every_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fast_config(&dir);
    let provider = MockProvider::new();
    let transport = ScriptedTransport::new();
    let table = ExperimentTable::main_experiments();

    run_batch(&provider, &transport, &table, &[], &cfg)
        .await
        .unwrap();

    let results: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&cfg.results_path).unwrap()).unwrap();
    let outcomes = results["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes
        .iter()
        .all(|o| o["status"] == "success" && o["instance_id"].is_string()));

    // One snapshot per launched instance lands next to the manifest.
    let snapshots = std::fs::read_dir(&cfg.snapshot_dir).unwrap().count();
    assert_eq!(snapshots, 4);
}

#[tokio::test]
async fn local_io_failure_aborts_the_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = fast_config(&dir);
    // A plain file where the manifest wants a parent directory makes the
    // first append fail with an I/O error.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    cfg.manifest_path = blocker.join("manifest.jsonl");

    let provider = MockProvider::new();
    let transport = ScriptedTransport::new();
    let table = ExperimentTable::main_experiments();

    let err = run_batch(
        &provider,
        &transport,
        &table,
        &names(&["therapy-talk", "booking-assistance"]),
        &cfg,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, LaunchError::Io(_)));
    // The second experiment was never attempted.
    assert_eq!(provider.counts().launch, 1);
    assert!(transport.exec_commands().is_empty());
}

/// Provider whose launch call succeeds but returns no instance ids.
struct EmptyLaunchProvider;

#[async_trait]
impl CloudProvider for EmptyLaunchProvider {
    async fn list_instance_types(&self) -> Result<Vec<api::InstanceTypeInfo>, LaunchError> {
        Ok(Vec::new())
    }

    async fn list_instances(&self) -> Result<Vec<api::Instance>, LaunchError> {
        Ok(Vec::new())
    }

    async fn get_instance(&self, id: &str) -> Result<api::Instance, LaunchError> {
        Err(LaunchError::NotFound(format!("instance {}", id)))
    }

    async fn launch_instances(
        &self,
        _req: &api::LaunchRequest,
    ) -> Result<Vec<String>, LaunchError> {
        Ok(Vec::new())
    }

    async fn terminate_instances(
        &self,
        _ids: &[String],
    ) -> Result<Vec<api::Instance>, LaunchError> {
        Ok(Vec::new())
    }

    async fn restart_instances(&self, _ids: &[String]) -> Result<Vec<api::Instance>, LaunchError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn empty_launch_response_is_a_recorded_failure_not_a_panic() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fast_config(&dir);
    let transport = ScriptedTransport::new();
    let table = ExperimentTable::main_experiments();

    let report = run_batch(
        &EmptyLaunchProvider,
        &transport,
        &table,
        &names(&["therapy-talk"]),
        &cfg,
    )
    .await
    .unwrap();

    assert!(report.any_failed());
    assert!(matches!(
        &report.outcomes[0].status,
        OutcomeStatus::Error { error } if error.contains("launch/empty-response")
    ));
}

#[tokio::test]
async fn download_failure_in_one_kind_leaves_the_other_intact() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new();
    transport.fail_copies_matching("/data/trajectories/");

    let outcomes = download_artifacts(
        &transport,
        "203.0.113.5",
        "therapy-01-11_07-48-19",
        dir.path(),
        &ArtifactKind::ALL,
    )
    .await;

    assert_eq!(outcomes.len(), 2);
    let models = outcomes
        .iter()
        .find(|o| o.kind == ArtifactKind::Models)
        .unwrap();
    let trajectories = outcomes
        .iter()
        .find(|o| o.kind == ArtifactKind::Trajectories)
        .unwrap();
    assert!(models.result.is_ok());
    assert!(trajectories.result.is_err());

    // Both kinds were attempted in spite of the failure.
    assert_eq!(transport.calls().len(), 2);
}
