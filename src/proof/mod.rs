//! Membership Proof System
//!
//! Every tile write and finalization is gated by a single-use membership
//! proof:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF SYSTEM                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  bundle.rs   - ProofBundle, nullifiers, digests             │
//! │  merkle.rs   - Group Merkle tree over identity commitments  │
//! │  provider.rs - ProofProvider trait + local prover           │
//! │  verify.rs   - MembershipVerifier trait + group registry    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bundle;
pub mod merkle;
pub mod provider;
pub mod verify;

// Re-export key types
pub use bundle::{GroupId, Nullifier, ProofBundle, ProofDigest};
pub use merkle::{MerkleTree, MerkleProof};
pub use provider::{Identity, LocalProofProvider, ProofProvider};
pub use verify::{GroupRegistry, MembershipVerifier, ProofError, external_nullifier_for};
