//! Minting
//!
//! Finalization seals a complete canvas into a permanent artifact on an
//! external ledger. `Minter` is that collaborator; `LedgerMinter` is the
//! in-process stand-in that issues sequential token ids and content
//! addressed artifact URIs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::info;

use crate::canvas::tile::{CanvasId, ImageRef};
use crate::core::hash::hash_with_domain;
use crate::proof::bundle::ProofBundle;

/// Proof of a completed mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintReceipt {
    /// Minted canvas.
    pub canvas_id: CanvasId,
    /// Content identifier of the flattened image.
    pub image_id: String,
    /// Where the artifact can be fetched.
    pub artifact_uri: String,
    /// Ledger token id.
    pub token_id: u64,
    /// When the ledger accepted the mint.
    pub minted_at: DateTime<Utc>,
}

impl MintReceipt {
    #[cfg(test)]
    pub(crate) fn new_for_test(canvas_id: CanvasId) -> Self {
        Self {
            canvas_id,
            image_id: "test".into(),
            artifact_uri: "ipfs://test".into(),
            token_id: 0,
            minted_at: Utc::now(),
        }
    }
}

/// Mint failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MintError {
    /// Ledger refused the transaction.
    #[error("ledger rejected mint: {0}")]
    Rejected(String),

    /// Ledger could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// External ledger that mints finalized canvases.
#[async_trait]
pub trait Minter: Send + Sync {
    /// Mint one artifact for `canvas_id`.
    async fn mint(
        &self,
        canvas_id: CanvasId,
        image: &ImageRef,
        proof: &ProofBundle,
    ) -> Result<MintReceipt, MintError>;
}

/// In-process ledger.
pub struct LedgerMinter {
    base_uri: String,
    next_token: AtomicU64,
}

impl LedgerMinter {
    /// Create a ledger publishing artifacts under `base_uri`.
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
            next_token: AtomicU64::new(0),
        }
    }

    /// Tokens minted so far.
    pub fn minted_count(&self) -> u64 {
        self.next_token.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Minter for LedgerMinter {
    async fn mint(
        &self,
        canvas_id: CanvasId,
        image: &ImageRef,
        _proof: &ProofBundle,
    ) -> Result<MintReceipt, MintError> {
        let image_id = hex::encode(hash_with_domain(b"TAZ_ARTIFACT_V1", image.as_str().as_bytes()));
        let token_id = self.next_token.fetch_add(1, Ordering::SeqCst);

        info!(canvas = %canvas_id, token_id, "Minted canvas artifact");

        Ok(MintReceipt {
            canvas_id,
            artifact_uri: format!("{}/{}", self.base_uri, image_id),
            image_id,
            token_id,
            minted_at: Utc::now(),
        })
    }
}
