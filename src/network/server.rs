//! Canvas Server
//!
//! HTTP API over a shared `CanvasStore`, plus the live WebSocket feed on
//! its own port.
//!
//! ```text
//! GET  /health                    → HealthResponse
//! GET  /canvas/current            → CanvasSnapshot
//! POST /canvas/:id/tile           → 201 Accepted | 203 Rejected | 403 | 404 | 400
//! POST /canvas/:id/finalize       → 201 Minted | 200 AlreadyFinalized | 403 | 404
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{info, instrument, warn};

use crate::canvas::state::CanvasSnapshot;
use crate::canvas::store::CanvasStore;
use crate::canvas::tile::CanvasId;
use crate::network::feed::CanvasFeed;
use crate::network::protocol::{
    ErrorBody, ErrorCode, FillTileRequest, FillTileResponse, FinalizeRequest, FinalizeResponse,
    HealthResponse,
};
use crate::proof::bundle::GroupId;

// =============================================================================
// Configuration
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind address.
    pub bind_addr: SocketAddr,
    /// Live feed (WebSocket) bind address.
    pub feed_addr: SocketAddr,
    /// Slots per canvas.
    pub tile_count: usize,
    /// Membership group gating writes.
    pub group_id: GroupId,
    /// Identity strings enrolled at startup.
    pub group_members: Vec<String>,
    /// Base URI for minted artifacts.
    pub artifact_base_uri: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            feed_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            tile_count: crate::DEFAULT_TILE_COUNT,
            group_id: GroupId(1),
            group_members: Vec::new(),
            artifact_base_uri: "ipfs://taz-canvas".to_string(),
        }
    }
}

impl ServerConfig {
    /// Read overrides from `TAZ_*` environment variables.
    pub fn from_env() -> Result<Self, ServerError> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("TAZ_BIND_ADDR") {
            config.bind_addr = parse_var("TAZ_BIND_ADDR", &addr)?;
        }
        if let Ok(addr) = std::env::var("TAZ_FEED_ADDR") {
            config.feed_addr = parse_var("TAZ_FEED_ADDR", &addr)?;
        }
        if let Ok(count) = std::env::var("TAZ_TILE_COUNT") {
            config.tile_count = parse_var("TAZ_TILE_COUNT", &count)?;
            if config.tile_count == 0 {
                return Err(ServerError::Config("TAZ_TILE_COUNT must be positive".into()));
            }
        }
        if let Ok(group) = std::env::var("TAZ_GROUP_ID") {
            config.group_id = GroupId(parse_var("TAZ_GROUP_ID", &group)?);
        }
        if let Ok(members) = std::env::var("TAZ_GROUP_MEMBERS") {
            config.group_members = members
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(uri) = std::env::var("TAZ_ARTIFACT_BASE_URI") {
            config.artifact_base_uri = uri;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ServerError> {
    value
        .trim()
        .parse()
        .map_err(|_| ServerError::Config(format!("invalid {}: {:?}", name, value)))
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Bind or serve failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

// =============================================================================
// Router
// =============================================================================

type ApiFailure = (StatusCode, Json<ErrorBody>);

fn failure(body: ErrorBody) -> ApiFailure {
    let status = StatusCode::from_u16(body.code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body))
}

fn bad_body(rejection: JsonRejection) -> ApiFailure {
    failure(ErrorBody::new(ErrorCode::BadRequest, rejection.body_text()))
}

/// Build the HTTP router over a store.
pub fn router(store: Arc<CanvasStore>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/canvas/current", get(current_canvas))
        .route("/canvas/:canvas_id/tile", post(fill_tile))
        .route("/canvas/:canvas_id/finalize", post(finalize))
        .layer(CorsLayer::permissive())
        .with_state(store)
}

async fn health(State(store): State<Arc<CanvasStore>>) -> Json<HealthResponse> {
    Json(store.stats().await.into())
}

async fn current_canvas(
    State(store): State<Arc<CanvasStore>>,
) -> Result<Json<CanvasSnapshot>, ApiFailure> {
    store
        .current()
        .await
        .map(Json)
        .map_err(|e| failure(ErrorBody::from(&e)))
}

async fn fill_tile(
    State(store): State<Arc<CanvasStore>>,
    Path(canvas_id): Path<CanvasId>,
    payload: Result<Json<FillTileRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FillTileResponse>), ApiFailure> {
    let Json(request) = payload.map_err(bad_body)?;

    let outcome = store
        .reserve_and_fill(canvas_id, request.tile_index, request.image_ref, &request.proof_bundle)
        .await
        .map_err(|e| failure(ErrorBody::from(&e)))?;

    let response = FillTileResponse::from(outcome);
    let status = StatusCode::from_u16(response.http_status()).unwrap_or(StatusCode::OK);
    Ok((status, Json(response)))
}

async fn finalize(
    State(store): State<Arc<CanvasStore>>,
    Path(canvas_id): Path<CanvasId>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FinalizeResponse>), ApiFailure> {
    let Json(request) = payload.map_err(bad_body)?;

    let outcome = store
        .finalize(canvas_id, request.flattened_image, &request.proof_bundle)
        .await
        .map_err(|e| failure(ErrorBody::from(&e)))?;

    let response = FinalizeResponse::from(outcome);
    let status = StatusCode::from_u16(response.http_status()).unwrap_or(StatusCode::OK);
    Ok((status, Json(response)))
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server plus live feed.
pub struct CanvasServer {
    config: ServerConfig,
    store: Arc<CanvasStore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CanvasServer {
    /// Create a server over an existing store.
    pub fn new(config: ServerConfig, store: Arc<CanvasStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { config, store, shutdown_tx }
    }

    /// Shared store.
    pub fn store(&self) -> Arc<CanvasStore> {
        self.store.clone()
    }

    /// Run until `shutdown` is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let http = TcpListener::bind(self.config.bind_addr).await?;
        let feed_listener = TcpListener::bind(self.config.feed_addr).await?;
        info!("Canvas API listening on {}", self.config.bind_addr);
        info!("Live feed listening on {}", self.config.feed_addr);

        let feed = CanvasFeed::new(self.store.clone());
        let feed_shutdown = self.shutdown_tx.subscribe();
        let feed_handle = tokio::spawn(async move {
            feed.serve(feed_listener, feed_shutdown).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let served = axum::serve(http, router(self.store.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutdown signal received");
            })
            .await;

        feed_handle.abort();
        if let Err(e) = &served {
            warn!("HTTP server stopped with error: {}", e);
        }
        served.map_err(ServerError::from)
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::mint::LedgerMinter;
    use crate::canvas::store::StoreConfig;
    use crate::canvas::tile::ImageRef;
    use crate::network::client::{ApiError, CanvasApi, HttpCanvasClient};
    use crate::proof::provider::{Identity, LocalProofProvider, ProofProvider};
    use crate::proof::verify::GroupRegistry;

    const GROUP: GroupId = GroupId(5);

    async fn spawn_server(tile_count: usize, members: &[&str]) -> (String, LocalProofProvider) {
        let registry = Arc::new(GroupRegistry::new());
        registry.create_group(GROUP).await;
        for m in members {
            registry.add_member(GROUP, Identity::from_secret_str(m).commitment()).await.unwrap();
        }

        let store = Arc::new(CanvasStore::new(
            StoreConfig { tile_count, ..Default::default() },
            registry.clone(),
            Arc::new(LedgerMinter::new("ipfs://t")),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(store)).await.unwrap();
        });

        (format!("http://{}", addr), LocalProofProvider::new(registry, GROUP))
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.tile_count, 9);
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.group_members.is_empty());
    }

    #[test]
    fn test_parse_var_reports_name() {
        let err = parse_var::<usize>("TAZ_TILE_COUNT", "many").unwrap_err();
        assert!(err.to_string().contains("TAZ_TILE_COUNT"));
    }

    #[tokio::test]
    async fn test_http_fill_conflict_and_finalize() {
        let (url, provider) = spawn_server(2, &["alice", "bob", "carol"]).await;
        let client = HttpCanvasClient::new(&url);

        let snapshot = client.current_canvas().await.unwrap();
        assert_eq!(snapshot.tiles.len(), 2);
        let id = snapshot.canvas_id;
        let signal = id.proof_signal();

        let alice = provider.generate(&Identity::from_secret_str("alice"), &signal).await.unwrap();
        let accepted = client.fill_tile(id, &FillTileRequest {
            tile_index: 0,
            image_ref: ImageRef::new("imgA").unwrap(),
            proof_bundle: alice,
        }).await.unwrap();
        assert!(matches!(accepted, FillTileResponse::Accepted { completed_by_this_write: false, .. }));

        let bob = provider.generate(&Identity::from_secret_str("bob"), &signal).await.unwrap();
        let rejected = client.fill_tile(id, &FillTileRequest {
            tile_index: 0,
            image_ref: ImageRef::new("imgB").unwrap(),
            proof_bundle: bob.clone(),
        }).await.unwrap();
        assert_eq!(rejected, FillTileResponse::Rejected {
            existing_tile: ImageRef::new("imgA").unwrap(),
        });

        // Same bundle, different tile.
        let replay = client.fill_tile(id, &FillTileRequest {
            tile_index: 1,
            image_ref: ImageRef::new("imgB").unwrap(),
            proof_bundle: bob,
        }).await.unwrap_err();
        assert_eq!(replay.code(), Some(ErrorCode::ProofInvalid));

        let carol = provider.generate(&Identity::from_secret_str("carol"), &signal).await.unwrap();
        let last = client.fill_tile(id, &FillTileRequest {
            tile_index: 1,
            image_ref: ImageRef::new("imgC").unwrap(),
            proof_bundle: carol.clone(),
        }).await.unwrap();
        assert!(matches!(last, FillTileResponse::Accepted { completed_by_this_write: true, .. }));

        let finalize = FinalizeRequest {
            flattened_image: ImageRef::new("flat").unwrap(),
            proof_bundle: carol,
        };
        let minted = client.finalize(id, &finalize).await.unwrap();
        assert!(matches!(minted, FinalizeResponse::Minted { .. }));
        let again = client.finalize(id, &finalize).await.unwrap();
        assert!(matches!(again, FinalizeResponse::AlreadyFinalized { .. }));
        assert_eq!(again.artifact_uri(), minted.artifact_uri());

        assert_ne!(client.current_canvas().await.unwrap().canvas_id, id);
    }

    #[tokio::test]
    async fn test_http_unknown_canvas_is_404() {
        let (url, provider) = spawn_server(2, &["alice"]).await;
        let client = HttpCanvasClient::new(&url);
        let other = CanvasId::new_random();

        let bundle = provider
            .generate(&Identity::from_secret_str("alice"), &other.proof_signal())
            .await
            .unwrap();
        let err = client.fill_tile(other, &FillTileRequest {
            tile_index: 0,
            image_ref: ImageRef::new("a").unwrap(),
            proof_bundle: bundle,
        }).await.unwrap_err();

        assert!(matches!(err, ApiError::Status { status: 404, code: Some(ErrorCode::UnknownCanvas), .. }));
    }

    #[tokio::test]
    async fn test_http_malformed_body_is_400() {
        let (url, _) = spawn_server(2, &[]).await;
        let client = HttpCanvasClient::new(&url);
        let id = client.current_canvas().await.unwrap().canvas_id;

        let resp = reqwest::Client::new()
            .post(format!("{}/canvas/{}/tile", url, id))
            .json(&serde_json::json!({ "tileIndex": 0, "imageRef": "" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);

        let health: HealthResponse = reqwest::get(format!("{}/health", url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.current_canvas, Some(id.to_string()));
    }
}
