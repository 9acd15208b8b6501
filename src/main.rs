//! TAZ Canvas Server
//!
//! Serves the canvas API and live feed. With `TAZ_DEMO=1` it instead
//! plays one canvas to completion in-process and exits.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use taz_canvas::{
    VERSION,
    canvas::{CanvasStore, LedgerMinter, StoreConfig},
    network::{CanvasServer, ServerConfig},
    proof::{GroupRegistry, Identity, LocalProofProvider},
    session::{
        ManifestRenderer, MemoryCache, PipelineConfig, PipelineError, SubmissionPipeline,
        TileReservationCoordinator, UniformRandom,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("TAZ Canvas Server v{}", VERSION);

    let config = ServerConfig::from_env().context("invalid server configuration")?;
    info!(
        tiles = config.tile_count,
        group = %config.group_id,
        members = config.group_members.len(),
        "Configuration loaded"
    );

    let registry = Arc::new(GroupRegistry::new());
    registry.create_group(config.group_id).await;
    for member in &config.group_members {
        registry
            .add_member(config.group_id, Identity::from_secret_str(member).commitment())
            .await
            .with_context(|| format!("failed to enroll member {:?}", member))?;
    }

    let minter = Arc::new(LedgerMinter::new(&config.artifact_base_uri));
    let store = Arc::new(CanvasStore::new(
        StoreConfig { tile_count: config.tile_count, ..Default::default() },
        registry.clone(),
        minter,
    ));

    if std::env::var("TAZ_DEMO").is_ok() {
        return demo_canvas(store, registry, &config).await;
    }

    let server = Arc::new(CanvasServer::new(config, store));
    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}

/// Fill one canvas with demo participants, one tile each.
async fn demo_canvas(
    store: Arc<CanvasStore>,
    registry: Arc<GroupRegistry>,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    info!("=== Starting Demo Canvas ===");

    let participants: Vec<String> = (0..config.tile_count).map(|i| format!("demo-{}", i)).collect();
    for p in &participants {
        registry
            .add_member(config.group_id, Identity::from_secret_str(p).commitment())
            .await?;
    }

    let pipeline = SubmissionPipeline::new(
        PipelineConfig::from_env(),
        store.clone(),
        Arc::new(LocalProofProvider::new(registry, config.group_id)),
        Arc::new(ManifestRenderer),
        Arc::new(MemoryCache::new()),
    );

    let canvas_id = store.current_id().await;
    info!("Canvas ID: {}", canvas_id);

    for (i, p) in participants.iter().enumerate() {
        let mut coordinator = TileReservationCoordinator::new(Box::new(UniformRandom));
        pipeline.refresh(&mut coordinator).await?;
        let tile = coordinator.auto_select()?;
        let drawing = taz_canvas::ImageRef::new(format!("demo-drawing-{}", i))
            .context("empty drawing reference")?;
        coordinator.record_drawing(drawing)?;

        match pipeline.submit(&mut coordinator, &Identity::from_secret_str(p)).await {
            Ok(report) => {
                info!("Participant {} placed tile {}", p, tile);
                if let Some(mint) = report.mint {
                    info!("Canvas minted: {}", mint.artifact_uri());
                }
            }
            Err(PipelineError::TileConflict { tile_index, .. }) => {
                warn!("Participant {} lost tile {}", p, tile_index);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let stats = store.stats().await;
    info!("=== Demo Results ===");
    info!("Canvases: {}, complete: {}, minted: {}", stats.canvases, stats.complete, stats.minted);
    Ok(())
}
