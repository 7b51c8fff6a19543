use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lakeset_core::{CoreConfig, CreationOutcome, DatasetId, DatasetService, DatasetState};

/// Main entry point for the dataset creation worker
///
/// Creates every dataset named on the command line, or every draft dataset when none is
/// named. Each dataset runs on its own blocking task; a dataset named twice runs once.
/// Ctrl-C asks every running creation to stop at its next checkpoint.
///
/// # Environment Variables
/// - `LAKESET_DATALAKE_DIR`: Root of the data lake (required)
/// - `LAKESET_DATASETS_DIR`: Root under which datasets are materialized (required)
/// - `LAKESET_DB_PATH`: SQLite database (default: `<datasets>/.lakeset.db`)
/// - `LAKESET_NOTARY_*`: Notarization service; datasets are not notarized without it
///
/// # Returns
/// * `Ok(())` - If every dataset was created or canceled
/// * `Err(anyhow::Error)` - If startup failed or any creation failed
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lakeset=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoreConfig::from_lookup(|name| std::env::var(name).ok())?;
    let service = Arc::new(DatasetService::from_config(Arc::new(config))?);

    let ids = dataset_ids(&service, std::env::args().skip(1))?;
    if ids.is_empty() {
        tracing::info!("no dataset to create");
        return Ok(());
    }
    tracing::info!("++ Creating {} datasets", ids.len());

    let interrupted = service.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            match interrupted.cancel_all() {
                Ok(ids) => tracing::info!("interrupted, stop requested for {} datasets", ids.len()),
                Err(e) => tracing::error!("failed to request stop: {:?}", e),
            }
        }
    });

    let mut tasks = JoinSet::new();
    for id in ids {
        let service = service.clone();
        tasks.spawn_blocking(move || (id, service.run(&id)));
    }

    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        let (id, result) = joined?;
        match result {
            Ok(CreationOutcome::Completed) => tracing::info!("dataset {} created", id),
            Ok(CreationOutcome::Cancelled) => tracing::info!("dataset {} canceled", id),
            Ok(CreationOutcome::Failed { message }) => {
                failed += 1;
                tracing::warn!("dataset {} failed: {}", id, message);
            }
            Err(e) => {
                failed += 1;
                tracing::error!("dataset {} could not be run: {:?}", id, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} dataset creations failed", failed);
    }
    Ok(())
}

fn dataset_ids(
    service: &DatasetService,
    args: impl Iterator<Item = String>,
) -> anyhow::Result<BTreeSet<DatasetId>> {
    let named = args
        .map(|arg| DatasetId::parse(&arg))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if !named.is_empty() {
        return Ok(named);
    }
    Ok(service
        .datasets()?
        .into_iter()
        .filter(|dataset| dataset.state == DatasetState::Draft)
        .map(|dataset| dataset.id)
        .collect())
}
