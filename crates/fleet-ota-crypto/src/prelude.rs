//! Prelude for fleet-ota-crypto
//!
//! Re-exports the types most callers need.

pub use crate::ed25519::{Ed25519Signer, Ed25519Verifier, KeyPair, PublicKey, Signature};
pub use crate::error::{CryptoError, CryptoResult};
pub use crate::signer::{Ed25519FirmwareSigner, FirmwareSigner};
pub use crate::utils::{compute_sha256_hex, digests_match};
