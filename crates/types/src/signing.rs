//! Opaque signature carrier types.
//!
//! The committee layer never verifies signatures itself: batches are delivered
//! by collaborators that have already checked them. Signatures are retained as
//! opaque bytes so they can be forwarded with the finalize payload.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ValidatorId;

/// An opaque signature produced and verified outside this crate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Validator that produced the signature.
    pub signer: ValidatorId,
    /// Raw signature bytes; scheme-dependent, treated as opaque.
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

impl Signature {
    /// Construct a signature carrier from a signer and raw bytes.
    pub fn new(signer: ValidatorId, bytes: Vec<u8>) -> Self {
        Self { signer, bytes }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}, {} bytes)", self.signer, self.bytes.len())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
