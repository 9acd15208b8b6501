//! Network Layer
//!
//! HTTP API and live feed on the server side, HTTP client on the
//! participant side. All canvas rules live in `canvas/`; this layer only
//! moves requests and events across the wire.

pub mod client;
pub mod feed;
pub mod protocol;
pub mod server;

pub use client::{ApiError, CanvasApi, HttpCanvasClient};
pub use feed::CanvasFeed;
pub use protocol::{
    ErrorBody, ErrorCode, FeedMessage, FillTileRequest, FillTileResponse, FinalizeRequest,
    FinalizeResponse, HealthResponse,
};
pub use server::{CanvasServer, ServerConfig, ServerError, router};
