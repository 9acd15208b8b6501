//! Canvas State
//!
//! The authoritative per-canvas record: slots, lifecycle phase, which
//! nullifier filled which slot, and the outcome of every fill attempt
//! (keyed by proof digest) so identical resends are answered the same
//! way. All mutation happens through `CanvasStore` under the canvas lock.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::canvas::mint::MintReceipt;
use crate::canvas::store::StoreError;
use crate::canvas::tile::{CanvasId, ImageRef, TileSlot, empty_indices};
use crate::core::hash::{CanvasHasher, Hash32};
use crate::proof::bundle::{Nullifier, ProofDigest};
use crate::proof::verify::ProofError;

/// Canvas lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasPhase {
    /// Accepting tile writes.
    Open,
    /// Every slot filled, not yet minted.
    Complete,
    /// Sealed into a minted artifact.
    Minted,
}

/// Point-in-time view of a canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSnapshot {
    /// Canvas identifier.
    pub canvas_id: CanvasId,
    /// Ordered slots.
    pub tiles: Vec<TileSlot>,
}

impl CanvasSnapshot {
    /// Number of empty slots.
    pub fn remaining(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_empty()).count()
    }

    /// All slots filled.
    pub fn is_complete(&self) -> bool {
        !self.tiles.is_empty() && self.remaining() == 0
    }

    /// Whether slot `index` exists and is empty.
    pub fn is_open(&self, index: usize) -> bool {
        self.tiles.get(index).map(TileSlot::is_empty).unwrap_or(false)
    }

    /// Indices of empty slots.
    pub fn empty_indices(&self) -> Vec<usize> {
        empty_indices(&self.tiles)
    }
}

/// Result of a fill attempt that reached the slot check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    /// Write accepted.
    Accepted {
        /// Full slot sequence after the write.
        tiles: Vec<TileSlot>,
        /// This write filled the last empty slot.
        completed: bool,
    },
    /// Slot was already filled; carries the image that won.
    Rejected {
        /// Winning image.
        existing: ImageRef,
    },
}

/// Outcome recorded against a proof digest.
#[derive(Debug, Clone)]
enum RecordedOutcome {
    Accepted { completed: bool },
    Rejected { existing: ImageRef },
    Refused(ProofError),
}

#[derive(Debug, Clone)]
struct FillAttempt {
    tile_index: usize,
    image: ImageRef,
    outcome: RecordedOutcome,
}

/// A canvas.
#[derive(Debug)]
pub struct Canvas {
    /// Canvas identifier.
    pub id: CanvasId,
    slots: Vec<TileSlot>,
    phase: CanvasPhase,
    /// Slot index to the nullifier that filled it.
    fillers: BTreeMap<usize, Nullifier>,
    used_nullifiers: BTreeSet<Nullifier>,
    attempts: BTreeMap<ProofDigest, FillAttempt>,
    completed_by: Option<Nullifier>,
    mint: Option<MintReceipt>,
    created_at: DateTime<Utc>,
}

impl Canvas {
    /// Create an empty canvas with `tile_count` slots.
    pub fn new(id: CanvasId, tile_count: usize) -> Self {
        Self {
            id,
            slots: vec![TileSlot::Empty; tile_count],
            phase: CanvasPhase::Open,
            fillers: BTreeMap::new(),
            used_nullifiers: BTreeSet::new(),
            attempts: BTreeMap::new(),
            completed_by: None,
            mint: None,
            created_at: Utc::now(),
        }
    }

    /// Slot sequence.
    pub fn tiles(&self) -> &[TileSlot] {
        &self.slots
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Canvas has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Snapshot for clients.
    pub fn snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot {
            canvas_id: self.id,
            tiles: self.slots.clone(),
        }
    }

    /// Number of empty slots.
    pub fn remaining(&self) -> usize {
        self.slots.iter().filter(|s| s.is_empty()).count()
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> CanvasPhase {
        self.phase
    }

    /// Every slot is filled.
    pub fn is_complete(&self) -> bool {
        self.phase != CanvasPhase::Open
    }

    /// Nullifier whose write completed the canvas.
    pub fn completed_by(&self) -> Option<Nullifier> {
        self.completed_by
    }

    /// Nullifier that filled a slot.
    pub fn filled_by(&self, index: usize) -> Option<Nullifier> {
        self.fillers.get(&index).copied()
    }

    /// Mint receipt, once minted.
    pub fn mint(&self) -> Option<&MintReceipt> {
        self.mint.as_ref()
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Signal every proof for this canvas must carry.
    pub fn proof_signal(&self) -> String {
        self.id.proof_signal()
    }

    /// Look up an earlier attempt made with the same bundle.
    ///
    /// An identical resend gets the recorded answer (with current tiles
    /// for an acceptance). Any other request with that bundle is a replay.
    pub fn replayed_outcome(
        &self,
        digest: &ProofDigest,
        tile_index: usize,
        image: &ImageRef,
    ) -> Option<Result<FillOutcome, ProofError>> {
        let attempt = self.attempts.get(digest)?;
        if attempt.tile_index != tile_index || &attempt.image != image {
            return Some(Err(ProofError::Replayed));
        }

        Some(match &attempt.outcome {
            RecordedOutcome::Accepted { completed } => Ok(FillOutcome::Accepted {
                tiles: self.slots.clone(),
                completed: *completed,
            }),
            RecordedOutcome::Rejected { existing } => Ok(FillOutcome::Rejected {
                existing: existing.clone(),
            }),
            RecordedOutcome::Refused(err) => Err(err.clone()),
        })
    }

    /// Check-and-write for one slot. Callers hold the canvas lock and have
    /// already verified the bundle; `digest` is recorded as consumed.
    pub fn try_fill(
        &mut self,
        tile_index: usize,
        image: ImageRef,
        nullifier: Nullifier,
        digest: ProofDigest,
    ) -> Result<FillOutcome, StoreError> {
        if tile_index >= self.slots.len() {
            return Err(StoreError::TileOutOfRange {
                index: tile_index,
                len: self.slots.len(),
            });
        }

        let (recorded, result) = self.fill_slot(tile_index, &image, nullifier);
        self.attempts.insert(digest, FillAttempt {
            tile_index,
            image,
            outcome: recorded,
        });
        result.map_err(StoreError::from)
    }

    fn fill_slot(
        &mut self,
        tile_index: usize,
        image: &ImageRef,
        nullifier: Nullifier,
    ) -> (RecordedOutcome, Result<FillOutcome, ProofError>) {
        if let Some(TileSlot::Filled(existing)) = self.slots.get(tile_index) {
            let existing = existing.clone();
            return (
                RecordedOutcome::Rejected { existing: existing.clone() },
                Ok(FillOutcome::Rejected { existing }),
            );
        }

        if self.used_nullifiers.contains(&nullifier) {
            return (
                RecordedOutcome::Refused(ProofError::NullifierUsed),
                Err(ProofError::NullifierUsed),
            );
        }

        self.slots[tile_index] = TileSlot::Filled(image.clone());
        self.fillers.insert(tile_index, nullifier);
        self.used_nullifiers.insert(nullifier);

        let completed = self.phase == CanvasPhase::Open && self.remaining() == 0;
        if completed {
            self.phase = CanvasPhase::Complete;
            self.completed_by = Some(nullifier);
        }

        (
            RecordedOutcome::Accepted { completed },
            Ok(FillOutcome::Accepted {
                tiles: self.slots.clone(),
                completed,
            }),
        )
    }

    /// Seal the canvas. Only valid once, on a complete canvas.
    pub fn record_mint(&mut self, receipt: MintReceipt) -> bool {
        if self.phase != CanvasPhase::Complete {
            return false;
        }
        self.mint = Some(receipt);
        self.phase = CanvasPhase::Minted;
        true
    }

    /// Hash of id and slots, for feed consumers.
    pub fn compute_hash(&self) -> Hash32 {
        let mut hasher = CanvasHasher::for_snapshot();
        hasher.update_uuid(self.id.as_bytes());
        hasher.update_u32(self.slots.len() as u32);
        for slot in &self.slots {
            match slot {
                TileSlot::Empty => hasher.update_bool(false),
                TileSlot::Filled(image) => {
                    hasher.update_bool(true);
                    hasher.update_str(image.as_str());
                }
            }
        }
        hasher.finalize()
    }
}
