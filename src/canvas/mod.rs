//! Canvas Model
//!
//! Authoritative server-side state for shared canvases:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CANVAS MODEL                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  tile.rs   - CanvasId, ImageRef, TileSlot                   │
//! │  state.rs  - Canvas, snapshots, fill outcomes               │
//! │  store.rs  - CanvasStore (per-canvas serialized mutation)   │
//! │  events.rs - CanvasEvent for live feed subscribers          │
//! │  mint.rs   - Minter ledger collaborator                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod events;
pub mod mint;
pub mod state;
pub mod store;
pub mod tile;

pub use events::CanvasEvent;
pub use mint::{LedgerMinter, MintError, MintReceipt, Minter};
pub use state::{Canvas, CanvasPhase, CanvasSnapshot, FillOutcome};
pub use store::{CanvasStore, FinalizeOutcome, StoreConfig, StoreError, StoreStats};
pub use tile::{CanvasId, ImageRef, TileSlot};
