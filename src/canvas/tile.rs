//! Tile and Canvas Identifiers
//!
//! `TileSlot` serializes as a plain string, `""` meaning empty, which is
//! the shape existing clients already send and expect.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};
use uuid::Uuid;

/// Unique canvas identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanvasId(pub Uuid);

impl CanvasId {
    /// Allocate a fresh random identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Signal string bound into every proof for this canvas.
    pub fn proof_signal(&self) -> String {
        format!("taz-canvas:{}", self.0)
    }
}

impl fmt::Display for CanvasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CanvasId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Reference to a stored image (data URI or content URI).
///
/// Never empty; the empty string is reserved for empty slots.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef(String);

impl ImageRef {
    /// Create an image reference. Returns `None` for an empty string.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Borrow the reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Data URIs can be huge; keep logs readable.
        match self.0.char_indices().nth(48) {
            Some((cut, _)) => write!(f, "{}…", &self.0[..cut]),
            None => write!(f, "{}", self.0),
        }
    }
}

impl TryFrom<String> for ImageRef {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value).ok_or("image reference must not be empty")
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.0
    }
}

/// Content of one canvas cell.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TileSlot {
    /// Nothing drawn yet.
    #[default]
    Empty,
    /// Immutable finalized image.
    Filled(ImageRef),
}

impl TileSlot {
    /// Check if the slot is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, TileSlot::Empty)
    }

    /// Get the image if filled.
    pub fn image(&self) -> Option<&ImageRef> {
        match self {
            TileSlot::Empty => None,
            TileSlot::Filled(image) => Some(image),
        }
    }
}

impl From<String> for TileSlot {
    fn from(value: String) -> Self {
        match ImageRef::new(value) {
            Some(image) => TileSlot::Filled(image),
            None => TileSlot::Empty,
        }
    }
}

impl From<TileSlot> for String {
    fn from(value: TileSlot) -> Self {
        match value {
            TileSlot::Empty => String::new(),
            TileSlot::Filled(image) => image.into(),
        }
    }
}

/// Indices of empty slots, in order.
pub fn empty_indices(tiles: &[TileSlot]) -> Vec<usize> {
    tiles.iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_empty())
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_image_rejected() {
        assert!(ImageRef::new("").is_none());
        assert!(ImageRef::new("data:image/png;base64,AAAA").is_some());
    }

    #[test]
    fn test_tiles_serialize_as_strings() {
        let tiles = vec![
            TileSlot::Empty,
            TileSlot::Filled(ImageRef::new("imgA").unwrap()),
            TileSlot::Empty,
        ];
        let json = serde_json::to_string(&tiles).unwrap();
        assert_eq!(json, r#"["","imgA",""]"#);

        let parsed: Vec<TileSlot> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tiles);
    }

    #[test]
    fn test_image_ref_rejects_empty_json() {
        let result: Result<ImageRef, _> = serde_json::from_str(r#""""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_indices() {
        let tiles = vec![
            TileSlot::Filled(ImageRef::new("a").unwrap()),
            TileSlot::Empty,
            TileSlot::Empty,
        ];
        assert_eq!(empty_indices(&tiles), vec![1, 2]);
    }

    #[test]
    fn test_canvas_id_parse() {
        let id = CanvasId::new_random();
        let parsed: CanvasId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.proof_signal().ends_with(&id.to_string()));
    }

    #[test]
    fn test_long_image_display_truncated() {
        let image = ImageRef::new("x".repeat(200)).unwrap();
        assert!(image.to_string().chars().count() < 60);
    }
}
