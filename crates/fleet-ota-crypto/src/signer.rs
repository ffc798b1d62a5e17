//! The signing seam consumed by release management
//!
//! Release management only needs "sign these bytes" and "does this signature
//! belong to these bytes". Key storage, algorithms and trust are hidden behind
//! [`FirmwareSigner`].

use crate::ed25519::{Ed25519Signer, Ed25519Verifier, KeyPair, PublicKey, Signature};
use crate::error::{CryptoError, CryptoResult};
use std::path::Path;
use tracing::{info, warn};

/// Signs firmware binaries and verifies signatures produced by the same key
pub trait FirmwareSigner: Send + Sync {
    /// Sign `data`, returning the signature in its transport encoding
    fn sign(&self, data: &[u8]) -> CryptoResult<String>;

    /// Verify `signature` over `data`.
    ///
    /// Returns [`CryptoError::InvalidSignature`] when the signature is well formed
    /// but does not match.
    fn verify(&self, data: &[u8], signature: &str) -> CryptoResult<()>;

    /// Fingerprint of the public key devices should trust
    fn key_fingerprint(&self) -> String;
}

/// [`FirmwareSigner`] backed by a single Ed25519 key pair.
///
/// Signatures are base64 encoded.
#[derive(Debug)]
pub struct Ed25519FirmwareSigner {
    keypair: KeyPair,
}

impl Ed25519FirmwareSigner {
    /// Wrap an existing key pair
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Create a signer with a freshly generated key
    pub fn generate() -> CryptoResult<Self> {
        Ok(Self::new(KeyPair::generate()?))
    }

    /// Load the signing key at `path`, generating and persisting one when the file is absent
    pub fn load_or_generate(path: &Path) -> CryptoResult<Self> {
        if path.exists() {
            let keypair = KeyPair::load_from_file(path)?;
            info!(
                fingerprint = %keypair.fingerprint(),
                "Loaded release signing key from {}",
                path.display()
            );
            return Ok(Self::new(keypair));
        }

        warn!(
            "No release signing key at {}, generating a new one",
            path.display()
        );
        let keypair = KeyPair::generate()?;
        keypair.save_to_file(path)?;
        Ok(Self::new(keypair))
    }

    /// The public half of the signing key
    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public_key
    }
}

impl FirmwareSigner for Ed25519FirmwareSigner {
    fn sign(&self, data: &[u8]) -> CryptoResult<String> {
        let signature = Ed25519Signer::sign(data, &self.keypair.signing_key)?;
        Ok(signature.to_base64())
    }

    fn verify(&self, data: &[u8], signature: &str) -> CryptoResult<()> {
        let signature = Signature::from_base64(signature)?;

        if Ed25519Verifier::verify(data, &signature, &self.keypair.public_key)? {
            Ok(())
        } else {
            Err(CryptoError::InvalidSignature)
        }
    }

    fn key_fingerprint(&self) -> String {
        self.keypair.fingerprint()
    }
}
