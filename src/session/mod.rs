//! Participant Session
//!
//! Client-side flow for claiming, drawing and submitting one tile:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PARTICIPANT SESSION                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  selection.rs   - tile selection policies                   │
//! │  reservation.rs - local claim state machine                 │
//! │  pipeline.rs    - proof → fill → finalize orchestration     │
//! │  completion.rs  - completing-write detection, finalize      │
//! │  render.rs      - canvas flattening seam                    │
//! │  state.rs       - modal/step progress for display           │
//! │  cache.rs       - pending reservation and minted artifact   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The local claim is advisory. Only `CanvasStore` decides who owns a
//! tile; this module keeps the UI honest about that.

pub mod cache;
pub mod completion;
pub mod pipeline;
pub mod render;
pub mod reservation;
pub mod selection;
pub mod state;

pub use cache::{CacheError, FileCache, LocalCache, MemoryCache, MintedArtifact, PendingReservation};
pub use completion::CompletionDetector;
pub use pipeline::{
    FinalizeRetry, PendingFill, PipelineConfig, PipelineError, SubmissionPipeline, SubmissionReport,
};
pub use render::{CanvasRenderer, ManifestRenderer, RenderError};
pub use reservation::{ReservationError, ReservationState, SubmitTicket, TileReservationCoordinator};
pub use selection::{FirstEmpty, Seeded, TileSelectionPolicy, UniformRandom};
pub use state::{
    DisplayConfig, DisplayEffect, DisplayHint, ModalPhase, SessionState, StepStatus, SubmissionStep,
};
