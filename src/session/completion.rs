//! Completion Detection
//!
//! Only the submission whose accepted write filled the last slot sees
//! `completedByThisWrite`, so only that participant finalizes. Finalize
//! itself is idempotent on the server, which makes retrying it safe.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::canvas::tile::CanvasId;
use crate::network::client::CanvasApi;
use crate::network::protocol::{FillTileResponse, FinalizeRequest, FinalizeResponse};
use crate::session::cache::{LocalCache, MintedArtifact};
use crate::session::pipeline::{FinalizeRetry, PipelineConfig, PipelineError, with_retries};

/// Decides on and performs finalization.
pub struct CompletionDetector {
    api: Arc<dyn CanvasApi>,
    cache: Arc<dyn LocalCache>,
    config: PipelineConfig,
}

impl CompletionDetector {
    /// Create a detector.
    pub fn new(api: Arc<dyn CanvasApi>, cache: Arc<dyn LocalCache>, config: PipelineConfig) -> Self {
        Self { api, cache, config }
    }

    /// This response is the one that completed the canvas.
    pub fn completed_by(response: &FillTileResponse) -> bool {
        matches!(response, FillTileResponse::Accepted { completed_by_this_write: true, .. })
    }

    /// Finalize `canvas_id` and cache the artifact for display.
    pub async fn finalize(
        &self,
        canvas_id: CanvasId,
        request: FinalizeRequest,
    ) -> Result<FinalizeResponse, PipelineError> {
        let result = with_retries(&self.config, "finalize", || {
            self.api.finalize(canvas_id, &request)
        })
        .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(canvas = %canvas_id, error = %e, "Finalize failed");
                return Err(PipelineError::FinalizationFailed {
                    canvas_id,
                    reason: e.to_string(),
                    retry: Box::new(FinalizeRetry::Resend(request)),
                });
            }
        };

        info!(
            canvas = %canvas_id,
            artifact = response.artifact_uri(),
            already = matches!(response, FinalizeResponse::AlreadyFinalized { .. }),
            "Canvas finalized"
        );

        let artifact = MintedArtifact {
            canvas_id,
            image_id: response.image_id().to_string(),
            artifact_uri: response.artifact_uri().to_string(),
            flattened: request.flattened_image,
            cached_at: Utc::now(),
        };
        if let Err(e) = self.cache.put_minted(artifact).await {
            warn!(canvas = %canvas_id, error = %e, "Failed to cache minted artifact");
        }

        Ok(response)
    }
}
