//! Membership Verification
//!
//! The store validates every bundle against current group state before
//! touching a canvas. `GroupRegistry` is the in-process group state and a
//! stand-in verifier: it checks the root is a known group root, the
//! signal and external nullifier match, and the proof bytes bind those
//! public inputs. It does NOT authenticate membership. The binding digest
//! covers public values only, so anyone can build a bundle it accepts,
//! with any nullifier. Real deployments put a zk verifier behind
//! `MembershipVerifier`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::hash::{CanvasHasher, Hash32, hash_with_domain};
use crate::proof::bundle::{GroupId, ProofBundle};
use crate::proof::merkle::{MerkleTree, MerkleProof};

/// Length of the salt prefix in proof bytes.
pub const PROOF_SALT_LEN: usize = 16;

/// Total proof length: salt followed by the binding digest.
pub const PROOF_LEN: usize = PROOF_SALT_LEN + 32;

/// Proof errors. Every variant is fatal for the bundle it names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    /// Group does not exist.
    #[error("unknown group {0}")]
    UnknownGroup(GroupId),

    /// Root was never a root of the group.
    #[error("merkle root is not a known group root")]
    UnknownRoot,

    /// Proof was generated for a different signal.
    #[error("signal mismatch: expected {expected}, got {got}")]
    SignalMismatch {
        /// Signal the verifier required.
        expected: String,
        /// Signal carried by the bundle.
        got: String,
    },

    /// External nullifier is not derived from the signal.
    #[error("external nullifier does not match signal")]
    ExternalNullifierMismatch,

    /// Proof bytes do not bind the public signals.
    #[error("proof does not verify")]
    BadProof,

    /// Bundle was already sent with a different request.
    #[error("proof bundle already consumed")]
    Replayed,

    /// Nullifier already filled a tile on this canvas.
    #[error("nullifier already used on this canvas")]
    NullifierUsed,

    /// Identity is not a member of the group.
    #[error("identity is not a group member")]
    NotAMember,

    /// Proof generation exceeded the caller's deadline.
    #[error("proof generation timed out")]
    Timeout,

    /// Prover failed for another reason.
    #[error("prover failed: {0}")]
    Provider(String),
}

/// Derive the external nullifier for a signal.
pub fn external_nullifier_for(signal: &str) -> Hash32 {
    hash_with_domain(b"TAZ_EXTERNAL_NULLIFIER_V1", signal.as_bytes())
}

/// Binding digest tying salt and public signals together.
pub(crate) fn binding_digest(
    salt: &[u8],
    nullifier: &Hash32,
    external_nullifier: &Hash32,
    root: &Hash32,
    group_id: GroupId,
    signal: &str,
) -> Hash32 {
    let mut hasher = CanvasHasher::new(b"TAZ_PROOF_BINDING_V1");
    hasher.update_var(salt);
    hasher.update_bytes(nullifier);
    hasher.update_bytes(external_nullifier);
    hasher.update_bytes(root);
    hasher.update_u64(group_id.0);
    hasher.update_str(signal);
    hasher.finalize()
}

/// Verifies bundles against group state.
#[async_trait]
pub trait MembershipVerifier: Send + Sync {
    /// Check a bundle's public signals for `expected_signal`. Whether this
    /// proves membership depends on the implementation.
    async fn verify(&self, bundle: &ProofBundle, expected_signal: &str) -> Result<(), ProofError>;
}

/// State of one group.
#[derive(Debug, Default)]
struct GroupState {
    tree: MerkleTree,
    /// Every root the group has had, oldest first.
    roots: Vec<Hash32>,
}

/// In-memory group registry.
///
/// Its `verify` checks consistency of public signals only; membership is
/// enforced by `LocalProofProvider` refusing non-members.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: RwLock<BTreeMap<GroupId, GroupState>>,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group (no-op if it exists).
    pub async fn create_group(&self, group_id: GroupId) {
        let mut groups = self.groups.write().await;
        groups.entry(group_id).or_insert_with(|| {
            let mut tree = MerkleTree::new();
            let root = tree.root();
            GroupState { tree, roots: vec![root] }
        });
    }

    /// Add an identity commitment. Returns the new root.
    pub async fn add_member(&self, group_id: GroupId, commitment: Hash32) -> Result<Hash32, ProofError> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(&group_id).ok_or(ProofError::UnknownGroup(group_id))?;

        if group.tree.position(&commitment).is_none() {
            group.tree.add_leaf_hash(commitment);
        }
        let root = group.tree.root();
        if group.roots.last() != Some(&root) {
            group.roots.push(root);
        }

        debug!(group = %group_id, members = group.tree.leaf_count(), "Group member added");
        Ok(root)
    }

    /// Current root of a group.
    pub async fn current_root(&self, group_id: GroupId) -> Option<Hash32> {
        let groups = self.groups.read().await;
        groups.get(&group_id).and_then(|g| g.roots.last().copied())
    }

    /// Number of members in a group.
    pub async fn member_count(&self, group_id: GroupId) -> usize {
        let groups = self.groups.read().await;
        groups.get(&group_id).map(|g| g.tree.leaf_count()).unwrap_or(0)
    }

    /// Inclusion witness for a commitment against the current root.
    pub async fn membership_witness(
        &self,
        group_id: GroupId,
        commitment: &Hash32,
    ) -> Result<(Hash32, MerkleProof), ProofError> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(&group_id).ok_or(ProofError::UnknownGroup(group_id))?;

        let index = group.tree.position(commitment).ok_or(ProofError::NotAMember)?;
        let root = group.tree.root();
        let path = group.tree.generate_proof(index).ok_or(ProofError::NotAMember)?;
        Ok((root, path))
    }
}

#[async_trait]
impl MembershipVerifier for GroupRegistry {
    async fn verify(&self, bundle: &ProofBundle, expected_signal: &str) -> Result<(), ProofError> {
        {
            let groups = self.groups.read().await;
            let group = groups.get(&bundle.group_id)
                .ok_or(ProofError::UnknownGroup(bundle.group_id))?;
            if !group.roots.contains(&bundle.merkle_root) {
                return Err(ProofError::UnknownRoot);
            }
        }

        if bundle.signal != expected_signal {
            return Err(ProofError::SignalMismatch {
                expected: expected_signal.to_string(),
                got: bundle.signal.clone(),
            });
        }

        if bundle.external_nullifier != external_nullifier_for(&bundle.signal) {
            return Err(ProofError::ExternalNullifierMismatch);
        }

        if bundle.proof.len() != PROOF_LEN {
            return Err(ProofError::BadProof);
        }
        let (salt, digest) = bundle.proof.split_at(PROOF_SALT_LEN);
        let expected = binding_digest(
            salt,
            &bundle.nullifier_hash.0,
            &bundle.external_nullifier,
            &bundle.merkle_root,
            bundle.group_id,
            &bundle.signal,
        );
        if digest != expected.as_slice() {
            return Err(ProofError::BadProof);
        }

        Ok(())
    }
}
