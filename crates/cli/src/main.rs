use anyhow::Context;
use clap::{Parser, Subcommand};
use lakeset_core::{
    AccessId, CoreConfig, CreationOutcome, CreationStatus, DatasetId, DatasetManifest,
    DatasetService, GroupId,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lakeset")]
#[command(about = "Dataset creation and access for the shared data lake")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all datasets
    List,
    /// Register a draft dataset from a JSON manifest
    Register {
        /// Path to the manifest file
        manifest: PathBuf,
    },
    /// Create (or resume the creation of) a dataset in the foreground
    Run {
        dataset_id: DatasetId,
    },
    /// Ask a running creation to stop
    Cancel {
        dataset_id: DatasetId,
    },
    /// Clear the error or stop of an unfinished creation so it can run again
    Relaunch {
        dataset_id: DatasetId,
    },
    /// Show where the creation of a dataset stands
    Status {
        dataset_id: DatasetId,
    },
    /// Open an access of a group to one or more datasets
    OpenAccess {
        /// Numeric group id
        group: GroupId,
        /// Datasets to grant
        #[arg(required = true)]
        dataset_ids: Vec<DatasetId>,
        /// The group already holds read rights, record the access only
        #[arg(long)]
        preauthorized: bool,
    },
    /// Close an access and revoke what no other open access still needs
    CloseAccess {
        access_id: i64,
    },
    /// Withdraw every grant on a dataset and mark it invalidated
    Invalidate {
        dataset_id: DatasetId,
    },
    /// Re-hash a dataset and compare it with its notarized digests
    Verify {
        dataset_id: DatasetId,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lakeset=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'lakeset --help' for commands");
        return Ok(());
    };

    let config = CoreConfig::from_lookup(|name| std::env::var(name).ok())?;
    let service = DatasetService::from_config(Arc::new(config))?;

    match command {
        Commands::List => {
            let datasets = service.datasets()?;
            if datasets.is_empty() {
                println!("No datasets found.");
            }
            for dataset in datasets {
                println!(
                    "{}  {:<11} {}  {} (created {})",
                    dataset.id,
                    dataset.state.as_str(),
                    dataset.project,
                    dataset.name,
                    dataset.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Register { manifest } => {
            let contents = std::fs::read(&manifest)
                .with_context(|| format!("reading {}", manifest.display()))?;
            let manifest: DatasetManifest = serde_json::from_slice(&contents)
                .with_context(|| format!("parsing {}", manifest.display()))?;
            let id = service.register(&manifest)?;
            println!("Registered dataset {}", id);
        }
        Commands::Run { dataset_id } => match service.run(&dataset_id)? {
            CreationOutcome::Completed => println!("Dataset {} created", dataset_id),
            CreationOutcome::Cancelled => println!("Creation of dataset {} canceled", dataset_id),
            CreationOutcome::Failed { message } => {
                anyhow::bail!("creation of dataset {} failed: {}", dataset_id, message)
            }
        },
        Commands::Cancel { dataset_id } => {
            if service.request_cancellation(&dataset_id)? {
                println!("Stop requested for dataset {}", dataset_id);
            } else {
                println!("Dataset {} is not being created", dataset_id);
            }
        }
        Commands::Relaunch { dataset_id } => {
            service.relaunch(&dataset_id)?;
            println!("Dataset {} can be run again", dataset_id);
        }
        Commands::Status { dataset_id } => match service.status(&dataset_id)? {
            CreationStatus::Running(checkpoint) => {
                let stop = if checkpoint.stop_requested {
                    " (stop requested)"
                } else {
                    ""
                };
                println!("running{}: {}", stop, checkpoint.last_message);
            }
            CreationStatus::Failed(checkpoint) => {
                println!("error: {}", checkpoint.last_message);
            }
            CreationStatus::Settled(state) => println!("{}", state.as_str()),
        },
        Commands::OpenAccess {
            group,
            dataset_ids,
            preauthorized,
        } => {
            let access = service.open_access(group, &dataset_ids, preauthorized)?;
            println!(
                "Opened access {} for group {} to {} datasets",
                access.id,
                access.group,
                access.dataset_ids.len()
            );
        }
        Commands::CloseAccess { access_id } => {
            let access = service.close_access(AccessId(access_id))?;
            println!("Closed access {} of group {}", access.id, access.group);
        }
        Commands::Invalidate { dataset_id } => {
            service.invalidate(&dataset_id)?;
            println!("Dataset {} invalidated", dataset_id);
        }
        Commands::Verify { dataset_id } => {
            let report = service.verify(&dataset_id)?;
            println!(
                "{} studies checked, {} without digest",
                report.checked, report.skipped
            );
            if report.is_corrupted() {
                anyhow::bail!(
                    "dataset {} is corrupted, mismatching studies: {}",
                    dataset_id,
                    report.mismatched.join(", ")
                );
            }
            println!("Dataset {} is intact", dataset_id);
        }
    }

    Ok(())
}
