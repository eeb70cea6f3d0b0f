use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kto_common::{ExperimentTable, Secrets};
use kto_orchestrator::archive::create_code_archive;
use kto_orchestrator::artifacts::{download_artifacts, ArtifactKind};
use kto_orchestrator::batch::{run_batch, BatchConfig};
use kto_orchestrator::transport::{NullTransport, OpenSshTransport};
use kto_providers::lambda::LambdaProvider;
use kto_providers::CloudProvider;

#[derive(Parser)]
#[command(
    name = "kto-launch",
    about = "Launch and manage KTO experiments on Lambda Cloud GPU instances",
    version
)]
struct Cli {
    /// Log level for internal tracing (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Path to the local secrets file
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the experiment batch on fresh GPU instances
    Launch {
        /// Experiment names to launch (default: all four)
        #[arg(long, value_delimiter = ',')]
        experiments: Vec<String>,

        #[arg(long, default_value = "gpu_1x_h100_sxm5")]
        instance_type: String,

        #[arg(long, default_value = "us-south-2")]
        region: String,

        /// Name of the SSH key registered with the cloud account
        #[arg(long)]
        ssh_key_name: String,

        /// Private key file matching --ssh-key-name
        #[arg(long, default_value = "~/.ssh/id_rsa")]
        ssh_key_file: String,

        /// Where the per-instance manifest rows are appended
        #[arg(long, default_value = "launch_manifest.jsonl")]
        manifest: PathBuf,

        /// Print the launch plan without touching the cloud API
        #[arg(long)]
        dry_run: bool,

        /// Show available instance types and exit without launching
        #[arg(long)]
        list_available: bool,
    },

    /// List the account's current instances
    ListInstances,

    /// List available instance types and where they have capacity
    ListInstanceTypes,

    /// Terminate instances by id
    Terminate {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Restart instances by id
    Restart {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Download run artifacts from an instance
    Download {
        /// Instance IP address or hostname
        #[arg(long)]
        address: String,

        /// Run name as it appears under the remote data directory
        #[arg(long)]
        run_name: String,

        /// Local directory to mirror the artifacts into
        #[arg(long, default_value = "downloaded")]
        dest: PathBuf,

        /// Artifact kinds to fetch (models, trajectories)
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<String>,

        #[arg(long, default_value = "~/.ssh/id_rsa")]
        ssh_key_file: String,
    },
}

async fn print_instance_types(provider: &dyn CloudProvider) -> anyhow::Result<()> {
    let types = provider.list_instance_types().await?;
    println!("Instance types ({}):", types.len());
    for ty in types {
        println!(
            "  {:<24} ${:>6.2}/hr  capacity: {}",
            ty.instance_type_name,
            ty.price_cents_per_hour as f64 / 100.0,
            if ty.regions_with_capacity_available.is_empty() {
                "none".to_string()
            } else {
                ty.regions_with_capacity_available.join(", ")
            }
        );
    }
    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Launch {
            experiments,
            instance_type,
            region,
            ssh_key_name,
            ssh_key_file,
            manifest,
            dry_run,
            list_available,
        } => {
            if list_available {
                let secrets = Secrets::load(&cli.env_file)?;
                let provider = LambdaProvider::new(secrets.api_key().to_string());
                print_instance_types(&provider).await?;
                return Ok(0);
            }

            let table = ExperimentTable::main_experiments();
            let cwd = std::env::current_dir().context("could not resolve working directory")?;
            let mut cfg = BatchConfig::defaults_in(cwd);
            cfg.instance_type = instance_type;
            cfg.region = region;
            cfg.ssh_key_name = ssh_key_name;
            cfg.ssh_key_file = expand_tilde(&ssh_key_file);
            cfg.manifest_path = manifest;
            cfg.dry_run = dry_run;

            if dry_run {
                // A dry run must work with no secrets, no key and no archive.
                let provider = kto_providers::mock::MockProvider::new();
                let report =
                    run_batch(&provider, &NullTransport, &table, &experiments, &cfg).await?;
                return Ok(if report.any_failed() { 1 } else { 0 });
            }

            let secrets = Secrets::load(&cli.env_file)?;
            let provider = LambdaProvider::new(secrets.api_key().to_string());
            let transport = OpenSshTransport::new(cfg.ssh_key_file.clone())?;

            let archive = create_code_archive(secrets.path()).await?;
            cfg.archive_path = Some(archive.clone());

            let report = run_batch(&provider, &transport, &table, &experiments, &cfg).await;
            std::fs::remove_file(&archive).ok();
            let report = report?;

            Ok(if report.any_failed() { 1 } else { 0 })
        }

        Commands::ListInstances => {
            let secrets = Secrets::load(&cli.env_file)?;
            let provider = LambdaProvider::new(secrets.api_key().to_string());
            let instances = provider.list_instances().await?;
            if instances.is_empty() {
                println!("No instances running.");
                return Ok(0);
            }
            println!("Instances ({}):", instances.len());
            for inst in instances {
                println!(
                    "  {}  {:<12}  ip={}  type={}  name={}",
                    inst.id,
                    inst.status,
                    inst.ip.as_deref().unwrap_or("-"),
                    inst.instance_type
                        .as_ref()
                        .map(|t| t.name.as_str())
                        .unwrap_or("-"),
                    inst.name.as_deref().unwrap_or("-"),
                );
            }
            Ok(0)
        }

        Commands::ListInstanceTypes => {
            let secrets = Secrets::load(&cli.env_file)?;
            let provider = LambdaProvider::new(secrets.api_key().to_string());
            print_instance_types(&provider).await?;
            Ok(0)
        }

        Commands::Terminate { ids } => {
            let secrets = Secrets::load(&cli.env_file)?;
            let provider = LambdaProvider::new(secrets.api_key().to_string());
            let terminated = provider.terminate_instances(&ids).await?;
            for inst in &terminated {
                println!("✅ Terminating {}", inst.id);
            }
            if terminated.len() < ids.len() {
                eprintln!(
                    "⚠️ Requested {} terminations, provider confirmed {}",
                    ids.len(),
                    terminated.len()
                );
            }
            Ok(0)
        }

        Commands::Restart { ids } => {
            let secrets = Secrets::load(&cli.env_file)?;
            let provider = LambdaProvider::new(secrets.api_key().to_string());
            let restarted = provider.restart_instances(&ids).await?;
            for inst in &restarted {
                println!("✅ Restarting {}", inst.id);
            }
            Ok(0)
        }

        Commands::Download {
            address,
            run_name,
            dest,
            kinds,
            ssh_key_file,
        } => {
            let kinds = if kinds.is_empty() {
                ArtifactKind::ALL.to_vec()
            } else {
                kinds
                    .iter()
                    .map(|k| {
                        ArtifactKind::parse(k)
                            .ok_or_else(|| anyhow::anyhow!("unknown artifact kind '{}'", k))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?
            };

            let transport = OpenSshTransport::new(expand_tilde(&ssh_key_file))?;
            let outcomes =
                download_artifacts(&transport, &address, &run_name, &dest, &kinds).await;

            let any_failed = outcomes.iter().any(|o| o.result.is_err());
            Ok(if any_failed { 1 } else { 0 })
        }
    }
}
