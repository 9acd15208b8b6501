//! Proof Bundle
//!
//! A single-use membership proof plus its public signals. The bundle is
//! opaque to this crate apart from its digest and public fields.

use std::fmt;

use serde::{Serialize, Deserialize};

use crate::core::hash::{CanvasHasher, Hash32, short_hex};

/// Semaphore-style group identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Nullifier hash: prevents the same identity acting twice for one action.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nullifier(#[serde(with = "hex32")] pub Hash32);

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nullifier({})", short_hex(&self.0))
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", short_hex(&self.0))
    }
}

/// Digest identifying one concrete bundle instance.
pub type ProofDigest = Hash32;

/// Membership proof and public signals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    /// Opaque proof bytes.
    #[serde(with = "hex_vec")]
    pub proof: Vec<u8>,
    /// Nullifier hash derived from identity and external nullifier.
    pub nullifier_hash: Nullifier,
    /// Action scope the nullifier is bound to.
    #[serde(with = "hex32")]
    pub external_nullifier: Hash32,
    /// Group root the proof was generated against.
    #[serde(with = "hex32")]
    pub merkle_root: Hash32,
    /// Group the prover claims membership of.
    pub group_id: GroupId,
    /// Signal bound into the proof.
    pub signal: String,
}

impl ProofBundle {
    /// Digest over every field.
    ///
    /// Two generations for the same identity and signal share a
    /// nullifier but never a digest, since proof bytes are salted.
    pub fn digest(&self) -> ProofDigest {
        let mut hasher = CanvasHasher::new(b"TAZ_PROOF_BUNDLE_V1");
        hasher.update_var(&self.proof);
        hasher.update_bytes(&self.nullifier_hash.0);
        hasher.update_bytes(&self.external_nullifier);
        hasher.update_bytes(&self.merkle_root);
        hasher.update_u64(self.group_id.0);
        hasher.update_str(&self.signal);
        hasher.finalize()
    }
}

/// Hex (de)serialization for 32-byte values.
pub(crate) mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde::de::Error;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(D::Error::custom)?;
        bytes.try_into().map_err(|_| D::Error::custom("expected 32 bytes"))
    }
}

/// Hex (de)serialization for byte vectors.
pub(crate) mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde::de::Error;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProofBundle {
        ProofBundle {
            proof: vec![1, 2, 3, 4],
            nullifier_hash: Nullifier([9; 32]),
            external_nullifier: [8; 32],
            merkle_root: [7; 32],
            group_id: GroupId(42),
            signal: "taz-canvas:test".into(),
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"nullifierHash\""));
        assert!(json.contains("\"externalNullifier\""));
        assert!(json.contains("\"merkleRoot\""));
        assert!(json.contains("\"groupId\":42"));
        assert!(json.contains("\"proof\":\"01020304\""));
    }

    #[test]
    fn test_json_accepts_0x_prefix() {
        let json = serde_json::to_string(&sample()).unwrap()
            .replace("\"0909", "\"0x0909");
        let parsed: ProofBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_short_hex_rejected() {
        let json = serde_json::to_string(&sample()).unwrap()
            .replace(&hex::encode([7u8; 32]), "0707");
        assert!(serde_json::from_str::<ProofBundle>(&json).is_err());
    }

    #[test]
    fn test_digest_covers_proof_bytes() {
        let a = sample();
        let mut b = sample();
        b.proof.push(5);
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), sample().digest());
    }
}
