//! Canvas Events
//!
//! Published by the store after each state change and streamed to live
//! feed subscribers.

use serde::{Serialize, Deserialize};

use crate::canvas::tile::{CanvasId, ImageRef};

/// Store events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CanvasEvent {
    /// A tile write was accepted.
    TileFilled {
        /// Canvas written to.
        canvas_id: CanvasId,
        /// Slot index.
        tile_index: usize,
        /// Accepted image.
        image: ImageRef,
        /// Empty slots left.
        remaining: usize,
        /// Hex snapshot hash after the write.
        snapshot_hash: String,
    },

    /// The last empty slot was filled.
    CanvasCompleted {
        /// Completed canvas.
        canvas_id: CanvasId,
    },

    /// A new open canvas became current.
    CanvasAllocated {
        /// New canvas.
        canvas_id: CanvasId,
        /// Slot count.
        tile_count: usize,
    },

    /// A complete canvas was minted.
    CanvasMinted {
        /// Minted canvas.
        canvas_id: CanvasId,
        /// Artifact content id.
        image_id: String,
        /// Artifact location.
        artifact_uri: String,
    },
}

impl CanvasEvent {
    /// Canvas the event is about.
    pub fn canvas_id(&self) -> CanvasId {
        match self {
            CanvasEvent::TileFilled { canvas_id, .. }
            | CanvasEvent::CanvasCompleted { canvas_id }
            | CanvasEvent::CanvasAllocated { canvas_id, .. }
            | CanvasEvent::CanvasMinted { canvas_id, .. } => *canvas_id,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
