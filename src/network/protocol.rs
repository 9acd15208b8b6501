//! Protocol Messages
//!
//! JSON wire format shared by the HTTP server, the HTTP client and the
//! live feed. Field names are camelCase; tiles travel as a string array
//! with `""` for an empty slot.

use serde::{Serialize, Deserialize};

use crate::canvas::events::CanvasEvent;
use crate::canvas::mint::MintReceipt;
use crate::canvas::state::{CanvasSnapshot, FillOutcome};
use crate::canvas::store::{FinalizeOutcome, StoreError, StoreStats};
use crate::canvas::tile::{ImageRef, TileSlot};
use crate::proof::bundle::ProofBundle;

// =============================================================================
// REQUESTS
// =============================================================================

/// `POST /canvas/{id}/tile` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillTileRequest {
    /// Slot to fill.
    pub tile_index: usize,
    /// Drawn image.
    pub image_ref: ImageRef,
    /// Single-use membership proof.
    pub proof_bundle: ProofBundle,
}

/// `POST /canvas/{id}/finalize` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    /// Flattened full-canvas image.
    pub flattened_image: ImageRef,
    /// Proof from the completing submission.
    pub proof_bundle: ProofBundle,
}

// =============================================================================
// RESPONSES
// =============================================================================

/// Tile submission result (201 or 203).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FillTileResponse {
    /// Write accepted.
    #[serde(rename_all = "camelCase")]
    Accepted {
        /// Authoritative slots after the write.
        tiles: Vec<TileSlot>,
        /// Every slot is filled.
        complete: bool,
        /// This write filled the last slot.
        completed_by_this_write: bool,
    },
    /// Slot already taken.
    #[serde(rename_all = "camelCase")]
    Rejected {
        /// Image holding the slot.
        existing_tile: ImageRef,
    },
}

impl From<FillOutcome> for FillTileResponse {
    fn from(outcome: FillOutcome) -> Self {
        match outcome {
            FillOutcome::Accepted { tiles, completed } => FillTileResponse::Accepted {
                complete: tiles.iter().all(|t| !t.is_empty()),
                completed_by_this_write: completed,
                tiles,
            },
            FillOutcome::Rejected { existing } => FillTileResponse::Rejected {
                existing_tile: existing,
            },
        }
    }
}

impl FillTileResponse {
    /// HTTP status for this response.
    pub fn http_status(&self) -> u16 {
        match self {
            FillTileResponse::Accepted { .. } => 201,
            FillTileResponse::Rejected { .. } => 203,
        }
    }
}

/// Finalize result (201 or 200).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalizeResponse {
    /// This call minted the canvas.
    #[serde(rename_all = "camelCase")]
    Minted {
        /// Artifact content id.
        image_id: String,
        /// Artifact location.
        artifact_uri: String,
    },
    /// Canvas was minted by an earlier call.
    #[serde(rename_all = "camelCase")]
    AlreadyFinalized {
        /// Artifact content id.
        image_id: String,
        /// Artifact location.
        artifact_uri: String,
    },
}

impl From<FinalizeOutcome> for FinalizeResponse {
    fn from(outcome: FinalizeOutcome) -> Self {
        match outcome {
            FinalizeOutcome::Minted(MintReceipt { image_id, artifact_uri, .. }) => {
                FinalizeResponse::Minted { image_id, artifact_uri }
            }
            FinalizeOutcome::AlreadyFinalized(MintReceipt { image_id, artifact_uri, .. }) => {
                FinalizeResponse::AlreadyFinalized { image_id, artifact_uri }
            }
        }
    }
}

impl FinalizeResponse {
    /// HTTP status for this response.
    pub fn http_status(&self) -> u16 {
        match self {
            FinalizeResponse::Minted { .. } => 201,
            FinalizeResponse::AlreadyFinalized { .. } => 200,
        }
    }

    /// Artifact location.
    pub fn artifact_uri(&self) -> &str {
        match self {
            FinalizeResponse::Minted { artifact_uri, .. }
            | FinalizeResponse::AlreadyFinalized { artifact_uri, .. } => artifact_uri,
        }
    }

    /// Artifact content id.
    pub fn image_id(&self) -> &str {
        match self {
            FinalizeResponse::Minted { image_id, .. }
            | FinalizeResponse::AlreadyFinalized { image_id, .. } => image_id,
        }
    }
}

/// `GET /health` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always "ok" when served.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Open canvas.
    pub current_canvas: Option<String>,
    /// Canvases held.
    pub canvases: usize,
    /// Complete, awaiting mint.
    pub complete: usize,
    /// Minted.
    pub minted: usize,
}

impl From<StoreStats> for HealthResponse {
    fn from(stats: StoreStats) -> Self {
        Self {
            status: "ok".into(),
            version: crate::VERSION.into(),
            current_canvas: stats.current.map(|id| id.to_string()),
            canvases: stats.canvases,
            complete: stats.complete,
            minted: stats.minted,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Proof refused, replayed or nullifier already used.
    ProofInvalid,
    /// No such canvas.
    UnknownCanvas,
    /// Malformed body or index out of range.
    BadRequest,
    /// Finalize before completion.
    NotComplete,
    /// Ledger failure.
    MintFailed,
}

impl ErrorCode {
    /// HTTP status carrying this code.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::ProofInvalid => 403,
            ErrorCode::UnknownCanvas => 404,
            ErrorCode::BadRequest => 400,
            ErrorCode::NotComplete | ErrorCode::MintFailed => 403,
        }
    }
}

/// Error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub error: String,
}

impl ErrorBody {
    /// Create an error body.
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self { code, error: error.into() }
    }
}

impl From<&StoreError> for ErrorBody {
    fn from(err: &StoreError) -> Self {
        let code = match err {
            StoreError::UnknownCanvas(_) => ErrorCode::UnknownCanvas,
            StoreError::TileOutOfRange { .. } => ErrorCode::BadRequest,
            StoreError::NotComplete(_) => ErrorCode::NotComplete,
            StoreError::Proof(_) => ErrorCode::ProofInvalid,
            StoreError::Mint(_) => ErrorCode::MintFailed,
        };
        ErrorBody::new(code, err.to_string())
    }
}

// =============================================================================
// LIVE FEED
// =============================================================================

/// Messages pushed to live feed subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Full view of the open canvas (on connect and after lag).
    Snapshot(CanvasSnapshot),
    /// Incremental store event.
    Event(CanvasEvent),
}

impl FeedMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::tile::CanvasId;
    use crate::proof::bundle::{GroupId, Nullifier};
    use crate::proof::verify::ProofError;

    fn img(s: &str) -> ImageRef {
        ImageRef::new(s).unwrap()
    }

    #[test]
    fn test_fill_request_field_names() {
        let request = FillTileRequest {
            tile_index: 2,
            image_ref: img("ipfs://a"),
            proof_bundle: ProofBundle {
                proof: vec![0xab],
                nullifier_hash: Nullifier([1; 32]),
                external_nullifier: [2; 32],
                merkle_root: [3; 32],
                group_id: GroupId(9),
                signal: "s".into(),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["tileIndex"], 2);
        assert_eq!(json["imageRef"], "ipfs://a");
        assert_eq!(json["proofBundle"]["proof"], "ab");
        assert_eq!(json["proofBundle"]["groupId"], 9);
    }

    #[test]
    fn test_accepted_wire_shape() {
        let response = FillTileResponse::from(FillOutcome::Accepted {
            tiles: vec![TileSlot::Empty, TileSlot::Filled(img("imgA")), TileSlot::Empty],
            completed: false,
        });
        assert_eq!(response.http_status(), 201);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["tiles"], serde_json::json!(["", "imgA", ""]));
        assert_eq!(json["complete"], false);
        assert_eq!(json["completedByThisWrite"], false);
    }

    #[test]
    fn test_rejected_wire_shape() {
        let response = FillTileResponse::from(FillOutcome::Rejected { existing: img("imgA") });
        assert_eq!(response.http_status(), 203);

        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"status":"rejected","existingTile":"imgA"}"#);
        assert_eq!(serde_json::from_str::<FillTileResponse>(&json).unwrap(), response);
    }

    #[test]
    fn test_finalize_statuses() {
        let receipt = MintReceipt::new_for_test(CanvasId::new_random());
        let minted = FinalizeResponse::from(FinalizeOutcome::Minted(receipt.clone()));
        let again = FinalizeResponse::from(FinalizeOutcome::AlreadyFinalized(receipt));

        assert_eq!(minted.http_status(), 201);
        assert_eq!(again.http_status(), 200);
        let json = serde_json::to_value(&again).unwrap();
        assert_eq!(json["status"], "already_finalized");
        assert_eq!(json["artifactUri"], "ipfs://test");
    }

    #[test]
    fn test_store_errors_map_to_codes() {
        let proof = ErrorBody::from(&StoreError::Proof(ProofError::Replayed));
        assert_eq!(proof.code, ErrorCode::ProofInvalid);
        assert_eq!(proof.code.http_status(), 403);

        let range = ErrorBody::from(&StoreError::TileOutOfRange { index: 9, len: 3 });
        assert_eq!(range.code.http_status(), 400);

        let unknown = ErrorBody::from(&StoreError::UnknownCanvas(CanvasId::new_random()));
        assert_eq!(unknown.code.http_status(), 404);
    }

    #[test]
    fn test_feed_message_tagging() {
        let msg = FeedMessage::Event(CanvasEvent::CanvasCompleted {
            canvas_id: CanvasId::new_random(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("\"event\":\"canvas_completed\""));
        assert_eq!(FeedMessage::from_json(&json).unwrap(), msg);
    }
}
