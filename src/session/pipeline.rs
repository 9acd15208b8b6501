//! Submission Pipeline
//!
//! Drives one tile submission end to end, strictly in order:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ 1-2 snapshot │──▶│ 3 render if  │──▶│ 4 proof      │──▶│ 5 fill tile  │
//! │ + predict    │   │ completing   │   │ (timeout)    │   │ (retries)    │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                                                 │
//!                        Rejected ◀───────────────────────────────┤
//!                                                                 ▼
//!                                                  ┌───────────────────────┐
//!                                                  │ 6 finalize, only when │
//!                                                  │ this write completed  │
//!                                                  └───────────────────────┘
//! ```
//!
//! Step 7 (display progress) happens alongside through `SessionState`.
//! Every failure leaves the coordinator `Claimed` or `Unclaimed`. A fill
//! that got no answer comes back as `NetworkFailure` carrying the request;
//! `resume_fill` resends it unchanged.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::canvas::state::CanvasSnapshot;
use crate::canvas::tile::{CanvasId, ImageRef, TileSlot};
use crate::core::hash::short_hex;
use crate::network::client::{ApiError, CanvasApi};
use crate::network::protocol::{
    ErrorCode, FillTileRequest, FillTileResponse, FinalizeRequest, FinalizeResponse,
};
use crate::proof::bundle::{ProofBundle, ProofDigest};
use crate::proof::provider::{Identity, ProofProvider};
use crate::proof::verify::ProofError;
use crate::session::cache::{LocalCache, PendingReservation};
use crate::session::completion::CompletionDetector;
use crate::session::render::{CanvasRenderer, RenderError};
use crate::session::reservation::{ReservationError, SubmitTicket, TileReservationCoordinator};
use crate::session::state::{DisplayConfig, SessionState};

// =============================================================================
// Configuration
// =============================================================================

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Deadline for proof generation.
    pub proof_timeout: Duration,
    /// Extra attempts for transient network failures.
    pub network_retries: u32,
    /// Base delay between attempts (multiplied by attempt number).
    pub retry_backoff: Duration,
    /// Cosmetic delays.
    pub display: DisplayConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            proof_timeout: Duration::from_secs(60),
            network_retries: 3,
            retry_backoff: Duration::from_millis(500),
            display: DisplayConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults with `TAZ_PROOF_TIMEOUT_MS`, `TAZ_NETWORK_RETRIES` and
    /// `TAZ_RETRY_BACKOFF_MS` applied when they parse.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_u64("TAZ_PROOF_TIMEOUT_MS") {
            config.proof_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("TAZ_NETWORK_RETRIES") {
            config.network_retries = n.min(u32::MAX as u64) as u32;
        }
        if let Some(ms) = env_u64("TAZ_RETRY_BACKOFF_MS") {
            config.retry_backoff = Duration::from_millis(ms);
        }
        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// =============================================================================
// Errors
// =============================================================================

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Prover failed or timed out; retry with a fresh proof.
    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(ProofError),

    /// Another participant filled the tile first.
    #[error("tile {tile_index} was filled by someone else first")]
    TileConflict {
        /// Lost tile.
        tile_index: usize,
        /// Image that holds it.
        existing: ImageRef,
    },

    /// Store refused the proof; never resend it.
    #[error("proof rejected: {0}")]
    ProofInvalid(String),

    /// No definitive answer from the server. When a fill may have landed,
    /// `retry` holds it for [`SubmissionPipeline::resume_fill`].
    #[error("network failure: {reason}")]
    NetworkFailure {
        /// What went wrong.
        reason: String,
        /// Fill to resend unchanged.
        retry: Option<Box<PendingFill>>,
    },

    /// Server answered with a refusal that a resend cannot change.
    #[error("request refused: {reason}")]
    RequestRefused {
        /// Server error code, when the body carried one.
        code: Option<ErrorCode>,
        /// Server message.
        reason: String,
    },

    /// Tile placed but minting failed; pass `retry` to
    /// [`SubmissionPipeline::retry_finalize`]. Anyone may retry.
    #[error("finalization of canvas {canvas_id} failed: {reason}")]
    FinalizationFailed {
        /// Complete, unminted canvas.
        canvas_id: CanvasId,
        /// What went wrong.
        reason: String,
        /// What to retry.
        retry: Box<FinalizeRetry>,
    },

    /// Local reservation refused.
    #[error(transparent)]
    Reservation(#[from] ReservationError),

    /// Prover returned a bundle this session already sent.
    #[error("proof bundle already consumed by an earlier attempt")]
    ProofAlreadyConsumed,

    /// Flattening the canvas failed before anything was sent.
    #[error("could not render canvas: {0}")]
    Render(#[from] RenderError),
}

impl PipelineError {
    fn from_api(err: ApiError) -> Self {
        if err.outcome_unknown() {
            PipelineError::NetworkFailure { reason: err.to_string(), retry: None }
        } else {
            PipelineError::RequestRefused { code: err.code(), reason: err.to_string() }
        }
    }
}

/// A fill sent without a definitive answer.
///
/// The store answers an identical resend with the outcome it recorded, so
/// resending is safe whether or not the first attempt landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFill {
    /// Canvas written to.
    pub canvas_id: CanvasId,
    /// Request exactly as sent.
    pub request: FillTileRequest,
}

/// How to retry a failed finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeRetry {
    /// Resend this request.
    Resend(FinalizeRequest),
    /// Rendering failed; flatten these tiles, then finalize.
    Render {
        /// Authoritative tiles of the complete canvas.
        tiles: Vec<TileSlot>,
        /// Bundle that made the completing write.
        proof_bundle: ProofBundle,
    },
}

/// Run `op`, retrying transient failures with linear backoff.
pub(crate) async fn with_retries<T, F, Fut>(
    config: &PipelineConfig,
    what: &str,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < config.network_retries => {
                attempt += 1;
                warn!(attempt, error = %e, "{} failed, retrying", what);
                tokio::time::sleep(config.retry_backoff * attempt).await;
            }
            other => return other,
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Outcome of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Canvas written to.
    pub canvas_id: CanvasId,
    /// Placed tile.
    pub tile_index: usize,
    /// Authoritative tiles after the write.
    pub tiles: Vec<TileSlot>,
    /// This write completed the canvas.
    pub completed_canvas: bool,
    /// Finalize answer, when this write completed the canvas.
    pub mint: Option<FinalizeResponse>,
}

/// Orchestrates proof, fill and finalize for one participant.
pub struct SubmissionPipeline {
    config: PipelineConfig,
    api: Arc<dyn CanvasApi>,
    prover: Arc<dyn ProofProvider>,
    renderer: Arc<dyn CanvasRenderer>,
    cache: Arc<dyn LocalCache>,
    completion: CompletionDetector,
    /// Digests of every bundle this session has sent.
    spent: Mutex<BTreeSet<ProofDigest>>,
    state: watch::Sender<SessionState>,
}

impl SubmissionPipeline {
    /// Wire a pipeline to its collaborators.
    pub fn new(
        config: PipelineConfig,
        api: Arc<dyn CanvasApi>,
        prover: Arc<dyn ProofProvider>,
        renderer: Arc<dyn CanvasRenderer>,
        cache: Arc<dyn LocalCache>,
    ) -> Self {
        let completion = CompletionDetector::new(api.clone(), cache.clone(), config.clone());
        let (state, _) = watch::channel(SessionState::default());
        Self {
            config,
            api,
            prover,
            renderer,
            cache,
            completion,
            spent: Mutex::new(BTreeSet::new()),
            state,
        }
    }

    /// Watch session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Current session state.
    pub fn session_state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Apply a UI-side change (erase modal, dismiss).
    pub fn update_state(&self, f: impl FnOnce(&mut SessionState)) {
        self.state.send_modify(f);
    }

    /// Finalization collaborator.
    pub fn completion(&self) -> &CompletionDetector {
        &self.completion
    }

    /// Fetch the open canvas into the coordinator.
    pub async fn refresh(
        &self,
        coordinator: &mut TileReservationCoordinator,
    ) -> Result<CanvasSnapshot, PipelineError> {
        let snapshot = with_retries(&self.config, "fetch canvas", || self.api.current_canvas())
            .await
            .map_err(PipelineError::from_api)?;
        coordinator.load_snapshot(snapshot.clone());
        Ok(snapshot)
    }

    /// Submit the coordinator's claimed tile.
    #[instrument(skip_all)]
    pub async fn submit(
        &self,
        coordinator: &mut TileReservationCoordinator,
        identity: &Identity,
    ) -> Result<SubmissionReport, PipelineError> {
        // 1. Snapshot and claim.
        let ticket = coordinator.begin_submit()?;
        let canvas_id = ticket.snapshot.canvas_id;
        let tile_index = ticket.tile_index;

        // 2-3. Predict completion; render before proving if so.
        let mut flattened = None;
        if ticket.anticipates_completion() {
            match self.renderer.flatten(canvas_id, &ticket.tiles_with_drawing()) {
                Ok(image) => flattened = Some(image),
                Err(e) => return Err(self.abort(coordinator, e.into())),
            }
        }
        debug!(
            canvas = %canvas_id,
            tile = tile_index,
            remaining_after = ticket.remaining_after(),
            "Submission started"
        );
        self.state.send_modify(|s| s.begin_submission(&self.config.display));

        // 4. Proof.
        let bundle = match self.generate_proof(identity, &canvas_id.proof_signal()).await {
            Ok(bundle) => bundle,
            Err(e) => return Err(self.abort(coordinator, PipelineError::ProofGenerationFailed(e))),
        };
        let digest = bundle.digest();
        if !self.spent.lock().await.insert(digest) {
            return Err(self.abort(coordinator, PipelineError::ProofAlreadyConsumed));
        }
        self.state.send_modify(SessionState::proof_generated);

        // 5-6. Fill, then finalize if this write completed the canvas.
        self.remember_pending(&ticket, &digest).await;
        let pending = PendingFill {
            canvas_id,
            request: FillTileRequest {
                tile_index,
                image_ref: ticket.image.clone(),
                proof_bundle: bundle,
            },
        };
        self.fill_and_finalize(coordinator, pending, flattened).await
    }

    /// Resend a fill that ended in `NetworkFailure` with a retry.
    ///
    /// The request goes out exactly as before. If the first attempt landed,
    /// the store answers with the recorded outcome and a completing write
    /// still finalizes.
    #[instrument(skip_all)]
    pub async fn resume_fill(
        &self,
        coordinator: &mut TileReservationCoordinator,
        pending: PendingFill,
    ) -> Result<SubmissionReport, PipelineError> {
        coordinator.resume_submit(
            pending.canvas_id,
            pending.request.tile_index,
            pending.request.image_ref.clone(),
        )?;
        self.spent.lock().await.insert(pending.request.proof_bundle.digest());
        debug!(canvas = %pending.canvas_id, tile = pending.request.tile_index, "Resending fill");
        self.state.send_modify(|s| {
            s.begin_submission(&self.config.display);
            s.proof_generated();
        });
        self.fill_and_finalize(coordinator, pending, None).await
    }

    /// Finalize a complete canvas.
    pub async fn finalize(
        &self,
        canvas_id: CanvasId,
        request: FinalizeRequest,
    ) -> Result<FinalizeResponse, PipelineError> {
        match self.completion.finalize(canvas_id, request).await {
            Ok(response) => {
                self.state.send_modify(|s| s.minted(&self.config.display));
                Ok(response)
            }
            Err(e) => {
                self.state.send_modify(|s| s.failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Retry after `FinalizationFailed`.
    pub async fn retry_finalize(
        &self,
        canvas_id: CanvasId,
        retry: FinalizeRetry,
    ) -> Result<FinalizeResponse, PipelineError> {
        let request = match retry {
            FinalizeRetry::Resend(request) => request,
            FinalizeRetry::Render { tiles, proof_bundle } => match self.renderer.flatten(canvas_id, &tiles) {
                Ok(flattened_image) => FinalizeRequest { flattened_image, proof_bundle },
                Err(e) => return Err(self.render_failed(canvas_id, e, tiles, proof_bundle)),
            },
        };
        self.finalize(canvas_id, request).await
    }

    async fn fill_and_finalize(
        &self,
        coordinator: &mut TileReservationCoordinator,
        pending: PendingFill,
        flattened: Option<ImageRef>,
    ) -> Result<SubmissionReport, PipelineError> {
        let canvas_id = pending.canvas_id;
        let tile_index = pending.request.tile_index;

        let result = with_retries(&self.config, "fill tile", || {
            self.api.fill_tile(canvas_id, &pending.request)
        })
        .await;
        let response = match result {
            Ok(response) => response,
            Err(e) => return Err(self.fill_failed(coordinator, pending, e).await),
        };
        self.forget_pending(canvas_id).await;

        let completed = CompletionDetector::completed_by(&response);
        let tiles = match response {
            FillTileResponse::Rejected { existing_tile } => {
                info!(canvas = %canvas_id, tile = tile_index, existing = %existing_tile, "Tile lost to another participant");
                coordinator.on_rejected(existing_tile.clone());
                self.state.send_modify(|s| s.conflict(existing_tile.clone()));
                return Err(PipelineError::TileConflict { tile_index, existing: existing_tile });
            }
            FillTileResponse::Accepted { tiles, .. } => tiles,
        };

        info!(canvas = %canvas_id, tile = tile_index, completed, "Tile placed");
        coordinator.on_accepted(CanvasSnapshot { canvas_id, tiles: tiles.clone() });
        self.state.send_modify(|s| s.tile_accepted(completed, &self.config.display));

        let mut report = SubmissionReport {
            canvas_id,
            tile_index,
            tiles,
            completed_canvas: completed,
            mint: None,
        };
        if !completed {
            return Ok(report);
        }

        // The local snapshot may have been stale, in which case nothing
        // was rendered up front.
        let proof_bundle = pending.request.proof_bundle;
        let flattened = match flattened {
            Some(image) => image,
            None => match self.renderer.flatten(canvas_id, &report.tiles) {
                Ok(image) => image,
                Err(e) => return Err(self.render_failed(canvas_id, e, report.tiles.clone(), proof_bundle)),
            },
        };

        let request = FinalizeRequest { flattened_image: flattened, proof_bundle };
        report.mint = Some(self.finalize(canvas_id, request).await?);
        Ok(report)
    }

    async fn fill_failed(
        &self,
        coordinator: &mut TileReservationCoordinator,
        pending: PendingFill,
        err: ApiError,
    ) -> PipelineError {
        let canvas_id = pending.canvas_id;
        if err.code() == Some(ErrorCode::ProofInvalid) {
            self.forget_pending(canvas_id).await;
            return self.abort(coordinator, PipelineError::ProofInvalid(err.to_string()));
        }
        if err.outcome_unknown() {
            // The pending reservation stays cached until a resend is answered.
            let failure = PipelineError::NetworkFailure {
                reason: err.to_string(),
                retry: Some(Box::new(pending)),
            };
            return self.abort(coordinator, failure);
        }

        self.forget_pending(canvas_id).await;
        let code = err.code();
        let failure = self.abort(coordinator, PipelineError::RequestRefused { code, reason: err.to_string() });
        if code == Some(ErrorCode::UnknownCanvas) {
            debug!(canvas = %canvas_id, "Canvas unknown to the server; releasing claim");
            let _ = coordinator.release();
        }
        failure
    }

    fn render_failed(
        &self,
        canvas_id: CanvasId,
        err: RenderError,
        tiles: Vec<TileSlot>,
        proof_bundle: ProofBundle,
    ) -> PipelineError {
        warn!(canvas = %canvas_id, error = %err, "Could not render completed canvas");
        let failure = PipelineError::FinalizationFailed {
            canvas_id,
            reason: format!("render: {}", err),
            retry: Box::new(FinalizeRetry::Render { tiles, proof_bundle }),
        };
        self.state.send_modify(|s| s.failed(failure.to_string()));
        failure
    }

    async fn generate_proof(&self, identity: &Identity, signal: &str) -> Result<ProofBundle, ProofError> {
        match tokio::time::timeout(self.config.proof_timeout, self.prover.generate(identity, signal)).await {
            Ok(result) => result,
            Err(_) => Err(ProofError::Timeout),
        }
    }

    fn abort(&self, coordinator: &mut TileReservationCoordinator, err: PipelineError) -> PipelineError {
        warn!(error = %err, "Submission aborted");
        coordinator.on_failed();
        self.state.send_modify(|s| s.failed(err.to_string()));
        err
    }

    async fn remember_pending(&self, ticket: &SubmitTicket, digest: &ProofDigest) {
        let pending = PendingReservation {
            canvas_id: ticket.snapshot.canvas_id,
            tile_index: ticket.tile_index,
            image: ticket.image.clone(),
            proof_digest: hex::encode(digest),
            created_at: Utc::now(),
        };
        if let Err(e) = self.cache.put_pending(pending).await {
            warn!(digest = %short_hex(digest), error = %e, "Failed to cache pending reservation");
        }
    }

    async fn forget_pending(&self, canvas_id: CanvasId) {
        if let Err(e) = self.cache.clear_pending(canvas_id).await {
            warn!(canvas = %canvas_id, error = %e, "Failed to clear pending reservation");
        }
    }
}
