//! # TAZ Canvas
//!
//! Collaborative canvases where anonymous, proof-gated participants each
//! claim one tile. The participant who fills the last tile mints the
//! finished canvas.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TAZ CANVAS                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── hash.rs     - Domain-separated SHA-256 hashing          │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  proof/          - Membership proofs                         │
//! │  ├── bundle.rs   - Proof bundles and nullifiers              │
//! │  ├── merkle.rs   - Group Merkle tree                         │
//! │  ├── provider.rs - Proof generation                          │
//! │  └── verify.rs   - Verification and group registry           │
//! │                                                              │
//! │  canvas/         - Authoritative canvas state (server)       │
//! │  ├── store.rs    - Atomic compare-and-set tile writes        │
//! │  └── mint.rs     - Ledger minting                            │
//! │                                                              │
//! │  network/        - HTTP API, live feed, HTTP client          │
//! │                                                              │
//! │  session/        - Participant flow (client)                 │
//! │  ├── reservation.rs - Local tile claims                      │
//! │  └── pipeline.rs    - Proof → fill → finalize                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - A tile, once filled, never changes.
//! - Concurrent writes to one slot have exactly one winner.
//! - A proof bundle is consumed by the first attempt that carries it.
//! - Each canvas is minted at most once.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod canvas;
pub mod core;
pub mod network;
pub mod proof;
pub mod session;

// Re-export commonly used types
pub use canvas::{CanvasId, CanvasSnapshot, CanvasStore, FillOutcome, ImageRef, StoreConfig, StoreError, TileSlot};
pub use network::{CanvasApi, CanvasServer, HttpCanvasClient, ServerConfig};
pub use proof::{GroupId, GroupRegistry, Identity, LocalProofProvider, ProofBundle, ProofError};
pub use session::{PipelineConfig, PipelineError, SubmissionPipeline, TileReservationCoordinator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of tiles per canvas.
pub const DEFAULT_TILE_COUNT: usize = 9;
