//! Canvas Rendering
//!
//! Flattening a full canvas into one image happens outside this crate;
//! `CanvasRenderer` is the seam. `ManifestRenderer` stands in for it with
//! a content-addressed manifest of the tile references.

use crate::canvas::tile::{CanvasId, ImageRef, TileSlot};
use crate::core::hash::CanvasHasher;

/// Rendering errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Some slots are still empty.
    #[error("canvas has {missing} empty tile(s)")]
    Incomplete {
        /// Empty slot count.
        missing: usize,
    },

    /// Renderer backend failed.
    #[error("render failed: {0}")]
    Backend(String),
}

/// Produces the flattened image of a complete canvas.
pub trait CanvasRenderer: Send + Sync {
    /// Flatten `tiles` into one image reference.
    fn flatten(&self, canvas_id: CanvasId, tiles: &[TileSlot]) -> Result<ImageRef, RenderError>;
}

/// Content-addressed manifest "rendering".
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestRenderer;

impl CanvasRenderer for ManifestRenderer {
    fn flatten(&self, canvas_id: CanvasId, tiles: &[TileSlot]) -> Result<ImageRef, RenderError> {
        let missing = tiles.iter().filter(|t| t.is_empty()).count();
        if missing > 0 || tiles.is_empty() {
            return Err(RenderError::Incomplete { missing });
        }

        let mut hasher = CanvasHasher::new(b"TAZ_CANVAS_MANIFEST_V1");
        hasher.update_uuid(canvas_id.as_bytes());
        hasher.update_u32(tiles.len() as u32);
        for image in tiles.iter().filter_map(TileSlot::image) {
            hasher.update_str(image.as_str());
        }

        ImageRef::new(format!("taz-manifest:{}", hex::encode(hasher.finalize())))
            .ok_or_else(|| RenderError::Backend("empty manifest reference".into()))
    }
}
