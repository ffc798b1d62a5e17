//! Ed25519 signature implementation for firmware releases
//!
//! This module provides:
//! - Key pair generation and key-file persistence
//! - Signing arbitrary data
//! - Signature verification
//!
//! # Security Considerations
//!
//! - Key generation uses `OsRng` for cryptographically secure randomness
//! - Key and signature equality use constant-time comparison
//! - Key files are written with owner-only permissions on Unix

use crate::error::CryptoError;
use crate::utils;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use subtle::ConstantTimeEq;
use tracing::debug;

const SIGNING_KEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;

/// Ed25519 public key wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey {
    /// Raw public key bytes (32 bytes for Ed25519)
    pub key_bytes: [u8; 32],
    /// Human-readable identifier for this key
    pub identifier: String,
}

impl PublicKey {
    /// Create a new public key from raw bytes
    pub fn from_bytes(bytes: [u8; 32], identifier: String) -> Self {
        Self {
            key_bytes: bytes,
            identifier,
        }
    }

    /// Get the fingerprint of this public key (SHA256 hash in hex)
    pub fn fingerprint(&self) -> String {
        utils::compute_key_fingerprint(&self.key_bytes)
    }

    /// Convert to ed25519_dalek VerifyingKey
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.key_bytes)
            .map_err(|e| CryptoError::KeyFormatError(format!("Invalid public key: {}", e)))
    }

    /// Compare two public keys in constant time
    pub fn ct_eq(&self, other: &PublicKey) -> bool {
        self.key_bytes.ct_eq(&other.key_bytes).into()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other)
    }
}

impl Eq for PublicKey {}

/// Ed25519 signature wrapper
#[derive(Debug, Clone)]
pub struct Signature {
    /// Raw signature bytes (64 bytes for Ed25519)
    pub signature_bytes: [u8; 64],
}

impl Signature {
    /// Create a new signature from raw bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self {
            signature_bytes: bytes,
        }
    }

    /// Encode signature as base64 string
    pub fn to_base64(&self) -> String {
        utils::encode_base64(&self.signature_bytes)
    }

    /// Parse signature from base64 string
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = utils::decode_base64(encoded)
            .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;

        let Ok(signature_bytes) = <[u8; SIGNATURE_LEN]>::try_from(bytes.as_slice()) else {
            return Err(CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_LEN,
                actual: bytes.len(),
            });
        };

        Ok(Self { signature_bytes })
    }

    /// Convert to ed25519_dalek Signature
    pub fn to_dalek_signature(&self) -> ed25519_dalek::Signature {
        ed25519_dalek::Signature::from_bytes(&self.signature_bytes)
    }

    /// Compare two signatures in constant time
    pub fn ct_eq(&self, other: &Signature) -> bool {
        self.signature_bytes.ct_eq(&other.signature_bytes).into()
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other)
    }
}

impl Eq for Signature {}

/// Ed25519 key pair for signing and verification
#[derive(Debug)]
pub struct KeyPair {
    /// The signing (private) key
    pub signing_key: SigningKey,
    /// The public key derived from the signing key
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random Ed25519 key pair
    ///
    /// Uses the operating system's cryptographically secure random number generator.
    pub fn generate() -> Result<Self, CryptoError> {
        use rand::rngs::OsRng;

        let signing_key = SigningKey::generate(&mut OsRng);
        let identifier = format!("generated-{}", chrono::Utc::now().timestamp());

        Ok(Self::from_signing_key(signing_key, identifier))
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(signing_key: SigningKey, identifier: String) -> Self {
        let verifying_key = signing_key.verifying_key();

        let public_key = PublicKey {
            key_bytes: verifying_key.to_bytes(),
            identifier,
        };

        Self {
            signing_key,
            public_key,
        }
    }

    /// Load a key pair from raw signing key bytes
    pub fn from_bytes(
        signing_key_bytes: &[u8; 32],
        identifier: String,
    ) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_bytes(signing_key_bytes);
        Ok(Self::from_signing_key(signing_key, identifier))
    }

    /// Parse a signing key encoded as hex (64 characters) or base64
    pub fn from_encoded(encoded: &str, identifier: String) -> Result<Self, CryptoError> {
        let encoded = encoded.trim();
        let bytes = match hex::decode(encoded) {
            Ok(bytes) => bytes,
            Err(_) => utils::decode_base64(encoded)?,
        };

        let Ok(key_bytes) = <[u8; SIGNING_KEY_LEN]>::try_from(bytes.as_slice()) else {
            return Err(CryptoError::InvalidKeyLength {
                expected: SIGNING_KEY_LEN,
                actual: bytes.len(),
            });
        };

        Self::from_bytes(&key_bytes, identifier)
    }

    /// Read a signing key file written by [`KeyPair::save_to_file`]
    pub fn load_from_file(path: &Path) -> Result<Self, CryptoError> {
        let encoded = std::fs::read_to_string(path)?;
        let identifier = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "release-key".to_string());

        debug!("Loaded signing key from {}", path.display());
        Self::from_encoded(&encoded, identifier)
    }

    /// Persist the signing key as hex, readable only by the owner on Unix
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, format!("{}\n", hex::encode(self.signing_key_bytes())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Get the signing key bytes (for secure storage)
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Get the public key fingerprint
    pub fn fingerprint(&self) -> String {
        self.public_key.fingerprint()
    }
}

/// Ed25519 signer for creating signatures
pub struct Ed25519Signer;

impl Ed25519Signer {
    /// Sign arbitrary data with a signing key
    pub fn sign(data: &[u8], signing_key: &SigningKey) -> Result<Signature, CryptoError> {
        let signature = signing_key
            .try_sign(data)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        Ok(Signature::from_bytes(signature.to_bytes()))
    }
}

/// Ed25519 signature verifier
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    /// Verify an Ed25519 signature against data and public key
    pub fn verify(
        data: &[u8],
        signature: &Signature,
        public_key: &PublicKey,
    ) -> Result<bool, CryptoError> {
        let verifying_key = public_key.to_verifying_key()?;
        let dalek_signature = signature.to_dalek_signature();

        match verifying_key.verify(data, &dalek_signature) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
