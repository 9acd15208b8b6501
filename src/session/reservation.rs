//! Tile Reservation
//!
//! Participant-side claim tracking. The claim is provisional: the store
//! decides who gets a tile. The coordinator only guarantees one claim at
//! a time and a well-defined state after every outcome.
//!
//! ```text
//!             select_tile(i)          begin_submit()
//! Unclaimed ─────────────────▶ Claimed ─────────────▶ Submitting
//!     ▲   ◀──── release/erase ───┘  ▲                 │  │  │
//!     │                             └──── on_failed ──┘  │  │
//!     └───────────── on_rejected (drawing retained) ─────┘  │
//!                                         Placed ◀── on_accepted
//! ```
//!
//! `resume_submit` re-enters `Submitting` from `Claimed` or `Unclaimed`
//! to resend a fill whose answer was lost.

use tracing::debug;

use crate::canvas::state::CanvasSnapshot;
use crate::canvas::tile::{CanvasId, ImageRef, TileSlot};
use crate::session::selection::{TileSelectionPolicy, UniformRandom};

/// Reservation errors. All are local refusals; nothing is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReservationError {
    /// Slot is filled in the latest snapshot.
    #[error("tile {index} is already filled")]
    TileFilled {
        /// Requested index.
        index: usize,
    },

    /// Another tile is claimed.
    #[error("tile {claimed} is already claimed")]
    AlreadyClaimed {
        /// Claimed index.
        claimed: usize,
    },

    /// No tile claimed.
    #[error("no tile claimed")]
    NotClaimed,

    /// A submission is running.
    #[error("submission already in flight")]
    SubmissionInFlight,

    /// Nothing drawn on the claimed tile.
    #[error("nothing drawn on tile {index}")]
    NoDrawing {
        /// Claimed index.
        index: usize,
    },

    /// Index past the end of the canvas.
    #[error("tile {index} out of range (canvas has {len})")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Slot count.
        len: usize,
    },

    /// No canvas loaded yet.
    #[error("no canvas snapshot loaded")]
    NoSnapshot,

    /// This participant already placed a tile on this canvas.
    #[error("tile {index} already placed on this canvas")]
    AlreadyPlaced {
        /// Placed index.
        index: usize,
    },

    /// No empty tile left to suggest.
    #[error("canvas has no empty tile")]
    CanvasFull,
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    /// Nothing claimed.
    Unclaimed,
    /// Tile provisionally claimed; only it is drawable.
    Claimed {
        /// Claimed index.
        index: usize,
    },
    /// Submission in flight.
    Submitting {
        /// Index being submitted.
        index: usize,
    },
    /// Store accepted the tile.
    Placed {
        /// Placed index.
        index: usize,
    },
}

/// Everything the pipeline needs for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTicket {
    /// Local snapshot at submit time.
    pub snapshot: CanvasSnapshot,
    /// Claimed tile.
    pub tile_index: usize,
    /// Drawing to place.
    pub image: ImageRef,
}

impl SubmitTicket {
    /// Empty slots left after this tile lands, per the local snapshot.
    pub fn remaining_after(&self) -> usize {
        self.snapshot
            .empty_indices()
            .into_iter()
            .filter(|&i| i != self.tile_index)
            .count()
    }

    /// Local prediction that this submission completes the canvas.
    pub fn anticipates_completion(&self) -> bool {
        self.remaining_after() == 0
    }

    /// Local tiles with the drawing placed.
    pub fn tiles_with_drawing(&self) -> Vec<TileSlot> {
        let mut tiles = self.snapshot.tiles.clone();
        if let Some(slot) = tiles.get_mut(self.tile_index) {
            *slot = TileSlot::Filled(self.image.clone());
        }
        tiles
    }
}

/// Tracks one participant's claim on the current canvas.
pub struct TileReservationCoordinator {
    state: ReservationState,
    snapshot: Option<CanvasSnapshot>,
    drawing: Option<ImageRef>,
    retained: Option<ImageRef>,
    policy: Box<dyn TileSelectionPolicy>,
}

impl Default for TileReservationCoordinator {
    fn default() -> Self {
        Self::new(Box::new(UniformRandom))
    }
}

impl TileReservationCoordinator {
    /// Create with a selection policy.
    pub fn new(policy: Box<dyn TileSelectionPolicy>) -> Self {
        Self {
            state: ReservationState::Unclaimed,
            snapshot: None,
            drawing: None,
            retained: None,
            policy,
        }
    }

    /// Current state.
    pub fn state(&self) -> ReservationState {
        self.state
    }

    /// Last loaded snapshot.
    pub fn snapshot(&self) -> Option<&CanvasSnapshot> {
        self.snapshot.as_ref()
    }

    /// Claimed (or in-flight) index.
    pub fn claimed_index(&self) -> Option<usize> {
        match self.state {
            ReservationState::Claimed { index } | ReservationState::Submitting { index } => Some(index),
            _ => None,
        }
    }

    /// Drawing on the claimed tile.
    pub fn drawing(&self) -> Option<&ImageRef> {
        self.drawing.as_ref()
    }

    /// Drawing kept from a lost tile, applied to the next claim.
    pub fn retained(&self) -> Option<&ImageRef> {
        self.retained.as_ref()
    }

    /// Install a fresh snapshot.
    ///
    /// A claim on a slot that is no longer open (or on a different canvas)
    /// is released with its drawing retained. A new canvas clears `Placed`.
    pub fn load_snapshot(&mut self, snapshot: CanvasSnapshot) {
        let same_canvas = self.snapshot.as_ref().map(|s| s.canvas_id) == Some(snapshot.canvas_id);

        match self.state {
            ReservationState::Claimed { index } if !same_canvas || !snapshot.is_open(index) => {
                debug!(tile = index, "Claimed tile no longer open; releasing");
                self.release_claim();
            }
            ReservationState::Placed { .. } if !same_canvas => {
                self.state = ReservationState::Unclaimed;
            }
            _ => {}
        }

        self.snapshot = Some(snapshot);
    }

    /// Claim tile `index`.
    ///
    /// Re-selecting the claimed tile is a no-op; any other selection while
    /// a claim is held is refused.
    pub fn select_tile(&mut self, index: usize) -> Result<usize, ReservationError> {
        let snapshot = self.snapshot.as_ref().ok_or(ReservationError::NoSnapshot)?;

        match self.state {
            ReservationState::Unclaimed => {
                if index >= snapshot.tiles.len() {
                    return Err(ReservationError::OutOfRange { index, len: snapshot.tiles.len() });
                }
                if !snapshot.is_open(index) {
                    return Err(ReservationError::TileFilled { index });
                }
                self.state = ReservationState::Claimed { index };
                if self.drawing.is_none() {
                    self.drawing = self.retained.take();
                }
                debug!(tile = index, "Tile claimed");
                Ok(index)
            }
            ReservationState::Claimed { index: claimed } if claimed == index => Ok(index),
            ReservationState::Claimed { index: claimed } => {
                Err(ReservationError::AlreadyClaimed { claimed })
            }
            ReservationState::Submitting { .. } => Err(ReservationError::SubmissionInFlight),
            ReservationState::Placed { index } => Err(ReservationError::AlreadyPlaced { index }),
        }
    }

    /// Suggest an empty tile using the selection policy, without claiming.
    pub fn suggest(&mut self) -> Option<usize> {
        let empty = self.snapshot.as_ref()?.empty_indices();
        self.policy.choose(&empty)
    }

    /// Claim the policy's suggestion.
    pub fn auto_select(&mut self) -> Result<usize, ReservationError> {
        if self.snapshot.is_none() {
            return Err(ReservationError::NoSnapshot);
        }
        let index = self.suggest().ok_or(ReservationError::CanvasFull)?;
        self.select_tile(index)
    }

    /// Store the drawing for the claimed tile.
    pub fn record_drawing(&mut self, image: ImageRef) -> Result<(), ReservationError> {
        match self.state {
            ReservationState::Claimed { .. } => {
                self.drawing = Some(image);
                Ok(())
            }
            ReservationState::Submitting { .. } => Err(ReservationError::SubmissionInFlight),
            ReservationState::Placed { index } => Err(ReservationError::AlreadyPlaced { index }),
            ReservationState::Unclaimed => Err(ReservationError::NotClaimed),
        }
    }

    /// Abandon the claim, keeping the drawing for the next tile.
    pub fn release(&mut self) -> Result<(), ReservationError> {
        match self.state {
            ReservationState::Claimed { .. } => {
                self.release_claim();
                Ok(())
            }
            ReservationState::Unclaimed => Ok(()),
            ReservationState::Submitting { .. } => Err(ReservationError::SubmissionInFlight),
            ReservationState::Placed { index } => Err(ReservationError::AlreadyPlaced { index }),
        }
    }

    /// Start over: discard any drawing and release the claim.
    pub fn erase(&mut self) -> Result<(), ReservationError> {
        self.release()?;
        self.drawing = None;
        self.retained = None;
        Ok(())
    }

    fn release_claim(&mut self) {
        self.state = ReservationState::Unclaimed;
        if let Some(drawing) = self.drawing.take() {
            self.retained = Some(drawing);
        }
    }

    /// `Claimed → Submitting`. Not re-entrant.
    pub fn begin_submit(&mut self) -> Result<SubmitTicket, ReservationError> {
        let index = match self.state {
            ReservationState::Claimed { index } => index,
            ReservationState::Submitting { .. } => return Err(ReservationError::SubmissionInFlight),
            ReservationState::Placed { index } => return Err(ReservationError::AlreadyPlaced { index }),
            ReservationState::Unclaimed => return Err(ReservationError::NotClaimed),
        };
        let image = self.drawing.clone().ok_or(ReservationError::NoDrawing { index })?;
        let snapshot = self.snapshot.clone().ok_or(ReservationError::NoSnapshot)?;

        self.state = ReservationState::Submitting { index };
        Ok(SubmitTicket { snapshot, tile_index: index, image })
    }

    /// Re-enter `Submitting` to resend a fill that got no answer.
    ///
    /// Works from `Unclaimed` too: a refresh after the lost answer may have
    /// released the claim because the write did land.
    pub fn resume_submit(
        &mut self,
        canvas_id: CanvasId,
        index: usize,
        image: ImageRef,
    ) -> Result<(), ReservationError> {
        let same_canvas = self.snapshot.as_ref().map(|s| s.canvas_id) == Some(canvas_id);
        match self.state {
            ReservationState::Unclaimed => {}
            ReservationState::Claimed { index: claimed } if claimed == index && same_canvas => {}
            ReservationState::Claimed { index: claimed } => {
                return Err(ReservationError::AlreadyClaimed { claimed });
            }
            ReservationState::Submitting { .. } => return Err(ReservationError::SubmissionInFlight),
            ReservationState::Placed { index } => return Err(ReservationError::AlreadyPlaced { index }),
        }

        if self.retained.as_ref() == Some(&image) {
            self.retained = None;
        }
        self.drawing = Some(image);
        self.state = ReservationState::Submitting { index };
        debug!(tile = index, canvas = %canvas_id, "Submission resumed");
        Ok(())
    }

    /// Store accepted the tile; adopt its view of the canvas.
    pub fn on_accepted(&mut self, snapshot: CanvasSnapshot) {
        if let ReservationState::Submitting { index } = self.state {
            self.state = ReservationState::Placed { index };
            self.drawing = None;
            self.snapshot = Some(snapshot);
        }
    }

    /// Store rejected the tile. The claim is void; the drawing is retained
    /// for the next selection and never placed automatically.
    pub fn on_rejected(&mut self, existing: ImageRef) {
        if let ReservationState::Submitting { index } = self.state {
            if let Some(slot) = self.snapshot.as_mut().and_then(|s| s.tiles.get_mut(index)) {
                *slot = TileSlot::Filled(existing);
            }
            self.release_claim();
        }
    }

    /// Submission failed before a definitive answer; keep the claim.
    pub fn on_failed(&mut self) {
        if let ReservationState::Submitting { index } = self.state {
            self.state = ReservationState::Claimed { index };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::selection::FirstEmpty;

    fn img(s: &str) -> ImageRef {
        ImageRef::new(s).unwrap()
    }

    fn snapshot(tiles: &[&str]) -> CanvasSnapshot {
        CanvasSnapshot {
            canvas_id: CanvasId::from_bytes([1; 16]),
            tiles: tiles.iter().map(|t| TileSlot::from(t.to_string())).collect(),
        }
    }

    fn coordinator(tiles: &[&str]) -> TileReservationCoordinator {
        let mut c = TileReservationCoordinator::new(Box::new(FirstEmpty));
        c.load_snapshot(snapshot(tiles));
        c
    }

    #[test]
    fn test_select_requires_snapshot() {
        let mut c = TileReservationCoordinator::default();
        assert_eq!(c.select_tile(0), Err(ReservationError::NoSnapshot));
    }

    #[test]
    fn test_filled_tile_refused_locally() {
        let mut c = coordinator(&["a", "", ""]);
        assert_eq!(c.select_tile(0), Err(ReservationError::TileFilled { index: 0 }));
        assert_eq!(c.select_tile(5), Err(ReservationError::OutOfRange { index: 5, len: 3 }));
        assert_eq!(c.state(), ReservationState::Unclaimed);
    }

    #[test]
    fn test_single_claim() {
        let mut c = coordinator(&["", "", ""]);
        assert_eq!(c.select_tile(1), Ok(1));
        assert_eq!(c.select_tile(1), Ok(1));
        assert_eq!(c.select_tile(2), Err(ReservationError::AlreadyClaimed { claimed: 1 }));
        assert_eq!(c.claimed_index(), Some(1));
    }

    #[test]
    fn test_submit_needs_drawing_and_is_not_reentrant() {
        let mut c = coordinator(&["", ""]);
        c.select_tile(0).unwrap();
        assert_eq!(c.begin_submit(), Err(ReservationError::NoDrawing { index: 0 }));

        c.record_drawing(img("mine")).unwrap();
        let ticket = c.begin_submit().unwrap();
        assert_eq!(ticket.tile_index, 0);
        assert!(!ticket.anticipates_completion());

        assert_eq!(c.begin_submit(), Err(ReservationError::SubmissionInFlight));
        assert_eq!(c.select_tile(1), Err(ReservationError::SubmissionInFlight));
    }

    #[test]
    fn test_rejection_retains_drawing_for_next_tile() {
        let mut c = coordinator(&["", "", ""]);
        c.select_tile(1).unwrap();
        c.record_drawing(img("mine")).unwrap();
        c.begin_submit().unwrap();

        c.on_rejected(img("theirs"));
        assert_eq!(c.state(), ReservationState::Unclaimed);
        assert_eq!(c.retained(), Some(&img("mine")));
        assert_eq!(c.snapshot().unwrap().tiles[1], TileSlot::Filled(img("theirs")));
        assert_eq!(c.select_tile(1), Err(ReservationError::TileFilled { index: 1 }));

        c.select_tile(2).unwrap();
        assert_eq!(c.drawing(), Some(&img("mine")));
        assert!(c.retained().is_none());
    }

    #[test]
    fn test_failure_returns_to_claimed() {
        let mut c = coordinator(&["", ""]);
        c.select_tile(0).unwrap();
        c.record_drawing(img("mine")).unwrap();
        c.begin_submit().unwrap();

        c.on_failed();
        assert_eq!(c.state(), ReservationState::Claimed { index: 0 });
        assert_eq!(c.drawing(), Some(&img("mine")));
    }

    #[test]
    fn test_accepted_then_new_canvas_resets() {
        let mut c = coordinator(&["", "x"]);
        c.select_tile(0).unwrap();
        c.record_drawing(img("mine")).unwrap();
        let ticket = c.begin_submit().unwrap();
        assert!(ticket.anticipates_completion());

        c.on_accepted(CanvasSnapshot { canvas_id: ticket.snapshot.canvas_id, tiles: ticket.tiles_with_drawing() });
        assert_eq!(c.state(), ReservationState::Placed { index: 0 });
        assert_eq!(c.select_tile(1), Err(ReservationError::AlreadyPlaced { index: 0 }));

        c.load_snapshot(CanvasSnapshot {
            canvas_id: CanvasId::from_bytes([2; 16]),
            tiles: vec![TileSlot::Empty; 2],
        });
        assert_eq!(c.state(), ReservationState::Unclaimed);
    }

    #[test]
    fn test_resume_after_claim_released() {
        let mut c = coordinator(&["", ""]);
        let canvas_id = c.snapshot().unwrap().canvas_id;
        c.select_tile(0).unwrap();
        c.record_drawing(img("mine")).unwrap();
        c.begin_submit().unwrap();
        c.on_failed();

        // The lost write landed; a refresh shows the tile filled.
        c.load_snapshot(snapshot(&["mine", ""]));
        assert_eq!(c.state(), ReservationState::Unclaimed);

        c.resume_submit(canvas_id, 0, img("mine")).unwrap();
        assert_eq!(c.state(), ReservationState::Submitting { index: 0 });
        assert!(c.retained().is_none());
        assert_eq!(c.resume_submit(canvas_id, 0, img("mine")), Err(ReservationError::SubmissionInFlight));
    }

    #[test]
    fn test_resume_refused_for_other_claim() {
        let mut c = coordinator(&["", ""]);
        let canvas_id = c.snapshot().unwrap().canvas_id;
        c.select_tile(1).unwrap();

        assert_eq!(
            c.resume_submit(canvas_id, 0, img("mine")),
            Err(ReservationError::AlreadyClaimed { claimed: 1 })
        );
        assert_eq!(c.state(), ReservationState::Claimed { index: 1 });
    }

    #[test]
    fn test_stale_claim_released_on_refresh() {
        let mut c = coordinator(&["", ""]);
        c.select_tile(0).unwrap();
        c.record_drawing(img("mine")).unwrap();

        c.load_snapshot(snapshot(&["theirs", ""]));
        assert_eq!(c.state(), ReservationState::Unclaimed);
        assert_eq!(c.retained(), Some(&img("mine")));
    }

    #[test]
    fn test_erase_discards_everything() {
        let mut c = coordinator(&["", ""]);
        c.select_tile(0).unwrap();
        c.record_drawing(img("mine")).unwrap();
        c.erase().unwrap();

        assert_eq!(c.state(), ReservationState::Unclaimed);
        assert!(c.drawing().is_none());
        assert!(c.retained().is_none());
    }

    #[test]
    fn test_auto_select_uses_policy() {
        let mut c = coordinator(&["a", "", ""]);
        assert_eq!(c.auto_select(), Ok(1));

        let mut full = coordinator(&["a", "b"]);
        assert_eq!(full.auto_select(), Err(ReservationError::CanvasFull));
    }
}
