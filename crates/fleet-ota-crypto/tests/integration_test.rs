//! Integration tests for fleet-ota-crypto
//!
//! These tests exercise the signer seam the way release management uses it.

use fleet_ota_crypto::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

mod signer_seam {
    use super::*;

    #[test]
    fn test_signer_usable_as_trait_object() -> Result<(), Box<dyn std::error::Error>> {
        let signer: Arc<dyn FirmwareSigner> = Arc::new(Ed25519FirmwareSigner::generate()?);
        let binary = vec![0xAAu8; 4096];

        let signature = signer.sign(&binary)?;
        signer.verify(&binary, &signature)?;
        assert_eq!(signer.key_fingerprint().len(), 64);

        Ok(())
    }

    #[test]
    fn test_hash_and_signature_are_independent_checks() -> Result<(), Box<dyn std::error::Error>>
    {
        let signer = Ed25519FirmwareSigner::generate()?;
        let binary = b"release-1.0.0".to_vec();
        let hash = compute_sha256_hex(&binary);
        let signature = signer.sign(&binary)?;

        let mut tampered = binary.clone();
        tampered.push(0);

        assert!(!digests_match(&hash, &compute_sha256_hex(&tampered)));
        assert!(signer.verify(&tampered, &signature).is_err());

        Ok(())
    }

    #[test]
    fn test_public_key_verifies_detached() -> Result<(), Box<dyn std::error::Error>> {
        let signer = Ed25519FirmwareSigner::generate()?;
        let signature = Signature::from_base64(&signer.sign(b"device side")?)?;

        let device_copy =
            PublicKey::from_bytes(signer.public_key().key_bytes, "device".to_string());
        assert!(Ed25519Verifier::verify(
            b"device side",
            &signature,
            &device_copy
        )?);

        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_bit_flip_breaks_signature(
        data in prop::collection::vec(any::<u8>(), 1..512),
        flip in any::<prop::sample::Index>(),
    ) {
        let signer = Ed25519FirmwareSigner::generate()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let signature = signer.sign(&data).map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut tampered = data.clone();
        let index = flip.index(tampered.len());
        if let Some(byte) = tampered.get_mut(index) {
            *byte ^= 0x01;
        }

        prop_assert!(signer.verify(&data, &signature).is_ok());
        prop_assert!(signer.verify(&tampered, &signature).is_err());
    }
}
