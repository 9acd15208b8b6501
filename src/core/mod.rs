//! Core deterministic primitives.
//!
//! Hashing and seeded randomness shared by the canvas store, the proof
//! layer, and the participant session.

pub mod hash;
pub mod rng;

// Re-export core types
pub use hash::{CanvasHasher, Hash32, hash_bytes, hash_with_domain, short_hex};
pub use rng::DeterministicRng;
