//! AIS track import utility

use ais_importer::{
    config::AppConfig,
    database::{memory::MemoryStore, Database, TrackStore},
    errors::ImportError,
    models::ImportResult,
    pipeline::Importer,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ImportError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    config.validate()?;

    // Ctrl-C stops reading and lets in-flight transactions finish
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    let result = if config.import.dry_run {
        info!("Dry run, nothing is written to the database");
        run_import(MemoryStore::new(), cancel, &config).await
    } else {
        let db = Database::connect(&config.database).await?;
        run_import(db, cancel, &config).await
    };

    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

async fn run_import<S: TrackStore>(
    store: S,
    cancel: CancellationToken,
    config: &AppConfig,
) -> ImportResult {
    let importer = Importer::from_config(store, cancel, &config.import);
    let (result, report) = importer.run(&config.import.source_dir).await;

    info!("AIS import completed: {:?}", result);
    if !report.is_clean() {
        warn!("Post-load fixup had failures: {:?}", report.failures);
    }
    result
}
