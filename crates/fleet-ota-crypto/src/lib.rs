//! Release signing and content hashing for fleet firmware rollouts
//!
//! Every firmware release is hashed with SHA-256 and signed with Ed25519 before
//! it is published. Devices receive both values alongside the download URL and
//! refuse a binary whose hash or signature does not match.
//!
//! # Architecture
//!
//! - [`ed25519`]: key pairs, signatures and raw sign/verify operations
//! - [`signer`]: the [`FirmwareSigner`] seam used by the rollout core
//! - [`error`]: error types for cryptographic operations
//!
//! # Example
//!
//! ```
//! use fleet_ota_crypto::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = Ed25519FirmwareSigner::generate()?;
//!
//! let firmware = b"\x7fELF firmware image";
//! let signature = signer.sign(firmware)?;
//!
//! signer.verify(firmware, &signature)?;
//! assert!(signer.verify(b"tampered", &signature).is_err());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod ed25519;
pub mod error;
pub mod prelude;
pub mod signer;

pub use ed25519::{Ed25519Signer, Ed25519Verifier, KeyPair, PublicKey, Signature};
pub use error::{CryptoError, CryptoResult};
pub use signer::{Ed25519FirmwareSigner, FirmwareSigner};

/// Hashing and encoding helpers shared by signers and the rollout core
pub mod utils {
    use crate::error::CryptoError;
    use hmac::{Hmac, Mac};
    use sha2::{Digest, Sha256};
    use subtle::ConstantTimeEq;

    type HmacSha256 = Hmac<Sha256>;

    /// Compute SHA256 fingerprint of a public key
    pub fn compute_key_fingerprint(public_key: &[u8]) -> String {
        compute_sha256_hex(public_key)
    }

    /// Compute SHA256 hash of data and return as lowercase hex string
    pub fn compute_sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// HMAC-SHA256 of `payload` under `key`, as lowercase hex
    pub fn compute_hmac_sha256_hex(key: &[u8], payload: &[u8]) -> Result<String, CryptoError> {
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| CryptoError::KeyFormatError(format!("HMAC key: {}", e)))?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Compare two digests without short-circuiting on the first differing byte
    pub fn digests_match(expected: &str, actual: &str) -> bool {
        let expected = expected.trim().to_ascii_lowercase();
        let actual = actual.trim().to_ascii_lowercase();
        expected.len() == actual.len() && bool::from(expected.as_bytes().ct_eq(actual.as_bytes()))
    }

    /// Encode bytes as base64 (Standard alphabet with padding)
    pub fn encode_base64(data: &[u8]) -> String {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        STANDARD.encode(data)
    }

    /// Decode base64 to bytes
    pub fn decode_base64(data: &str) -> Result<Vec<u8>, CryptoError> {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        STANDARD.decode(data.trim()).map_err(CryptoError::from)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_sha256_known_vector() {
            assert_eq!(
                compute_sha256_hex(b"abc"),
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            );
        }

        #[test]
        fn test_digests_match_ignores_case() {
            let digest = compute_sha256_hex(b"firmware");
            assert!(digests_match(&digest, &digest.to_uppercase()));
            assert!(!digests_match(&digest, &compute_sha256_hex(b"firmware2")));
            assert!(!digests_match(&digest, "abc"));
        }

        #[test]
        fn test_hmac_sha256_known_vector() -> Result<(), CryptoError> {
            // RFC 4231 test case 2
            assert_eq!(
                compute_hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?")?,
                "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
            );
            Ok(())
        }

        #[test]
        fn test_hmac_depends_on_key() -> Result<(), CryptoError> {
            let payload = b"rel-1/firmware.bin:1700000000";
            assert_ne!(
                compute_hmac_sha256_hex(b"key-a", payload)?,
                compute_hmac_sha256_hex(b"key-b", payload)?
            );
            Ok(())
        }
    }
}
