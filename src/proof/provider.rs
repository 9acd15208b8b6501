//! Proof Provider
//!
//! Asynchronous proof generation, opaque to the rest of the crate.
//! `LocalProofProvider` is the in-process prover used by the demo, the
//! tests, and single-host deployments that share a `GroupRegistry`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use tracing::{debug, instrument};

use crate::core::hash::{Hash32, CanvasHasher, hash_with_domain};
use crate::proof::bundle::{GroupId, Nullifier, ProofBundle};
use crate::proof::merkle::MerkleTree;
use crate::proof::verify::{
    GroupRegistry, ProofError, PROOF_SALT_LEN, binding_digest, external_nullifier_for,
};

/// A participant's identity secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    secret: Hash32,
}

impl Identity {
    /// Create from raw secret bytes.
    pub fn from_secret(secret: Hash32) -> Self {
        Self { secret }
    }

    /// Derive from a stored identity string.
    pub fn from_secret_str(secret: &str) -> Self {
        Self::from_secret(hash_with_domain(b"TAZ_IDENTITY_SECRET_V1", secret.as_bytes()))
    }

    /// Public commitment registered in the group.
    pub fn commitment(&self) -> Hash32 {
        hash_with_domain(b"TAZ_IDENTITY_COMMITMENT_V1", &self.secret)
    }

    /// Nullifier for an action scope.
    pub fn nullifier(&self, external_nullifier: &Hash32) -> Nullifier {
        let mut hasher = CanvasHasher::new(b"TAZ_NULLIFIER_V1");
        hasher.update_bytes(&self.secret);
        hasher.update_bytes(external_nullifier);
        Nullifier(hasher.finalize())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Identity(<redacted>)")
    }
}

/// Produces membership proofs for a signal.
#[async_trait]
pub trait ProofProvider: Send + Sync {
    /// Generate a fresh bundle. May be slow and may fail.
    async fn generate(&self, identity: &Identity, signal: &str) -> Result<ProofBundle, ProofError>;
}

/// In-process prover backed by a shared group registry.
pub struct LocalProofProvider {
    registry: Arc<GroupRegistry>,
    group_id: GroupId,
}

impl LocalProofProvider {
    /// Create a provider for one group.
    pub fn new(registry: Arc<GroupRegistry>, group_id: GroupId) -> Self {
        Self { registry, group_id }
    }
}

#[async_trait]
impl ProofProvider for LocalProofProvider {
    #[instrument(skip(self, identity), fields(group = %self.group_id))]
    async fn generate(&self, identity: &Identity, signal: &str) -> Result<ProofBundle, ProofError> {
        let commitment = identity.commitment();
        let (root, path) = self.registry
            .membership_witness(self.group_id, &commitment)
            .await?;

        if !MerkleTree::verify_proof_with_hash(&root, &path, &commitment) {
            return Err(ProofError::Provider("stale membership witness".into()));
        }

        let external_nullifier = external_nullifier_for(signal);
        let nullifier = identity.nullifier(&external_nullifier);

        let mut salt = [0u8; PROOF_SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = binding_digest(
            &salt,
            &nullifier.0,
            &external_nullifier,
            &root,
            self.group_id,
            signal,
        );

        let mut proof = Vec::with_capacity(PROOF_SALT_LEN + digest.len());
        proof.extend_from_slice(&salt);
        proof.extend_from_slice(&digest);

        debug!(nullifier = %nullifier, "Generated membership proof");

        Ok(ProofBundle {
            proof,
            nullifier_hash: nullifier,
            external_nullifier,
            merkle_root: root,
            group_id: self.group_id,
            signal: signal.to_string(),
        })
    }
}
