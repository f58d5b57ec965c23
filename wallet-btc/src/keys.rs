//! secp256k1 key handling and ECDSA signatures.

use secp256k1::{ecdsa::Signature, Message, PublicKey, SecretKey, SECP256K1};
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum KeyError {
    #[error("invalid secp256k1 private key")]
    InvalidKey,
    #[error("invalid ECDSA signature")]
    InvalidSignature,
}

/// Validate 32 bytes as a secp256k1 secret key (`0 < k < n`).
pub fn secret_from_bytes(bytes: &[u8]) -> Result<SecretKey, KeyError> {
    SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidKey)
}

/// Derive the public key for a secret key.
pub fn public_key(secret: &SecretKey) -> PublicKey {
    secret.public_key(&SECP256K1)
}

/// 33-byte compressed public key serialization.
pub fn compressed(public: &PublicKey) -> [u8; 33] {
    public.serialize()
}

/// 65-byte uncompressed public key serialization.
pub fn uncompressed(public: &PublicKey) -> [u8; 65] {
    public.serialize_uncompressed()
}

/// 32-byte x-only projection of a public key (BIP340 key representation).
pub fn x_only(public: &PublicKey) -> [u8; 32] {
    public.x_only_public_key().0.serialize()
}

/// ECDSA-sign a 32-byte digest, returning a low-S DER signature.
pub fn sign_ecdsa(secret: &SecretKey, digest: [u8; 32]) -> Vec<u8> {
    let msg = Message::from_digest(digest);
    let mut sig = SECP256K1.sign_ecdsa(&msg, secret);
    // libsecp already emits low-S; normalizing keeps that an invariant rather
    // than an implementation detail.
    sig.normalize_s();
    sig.serialize_der().to_vec()
}

/// Verify a DER ECDSA signature over a 32-byte digest.
pub fn verify_ecdsa(
    public: &PublicKey,
    digest: [u8; 32],
    der_sig: &[u8],
) -> Result<(), KeyError> {
    let msg = Message::from_digest(digest);
    let mut sig = Signature::from_der(der_sig).map_err(|_| KeyError::InvalidSignature)?;
    sig.normalize_s();
    SECP256K1
        .verify_ecdsa(&msg, &sig, public)
        .map_err(|_| KeyError::InvalidSignature)
}

/// Whether a DER signature's S component is in the lower half of the curve
/// order.
pub fn is_low_s(der_sig: &[u8]) -> Result<bool, KeyError> {
    let sig = Signature::from_der(der_sig).map_err(|_| KeyError::InvalidSignature)?;
    let mut normalized = sig;
    normalized.normalize_s();
    Ok(sig == normalized)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hashes::sha256;

    #[test]
    fn rejects_out_of_range_secrets() {
        assert_eq!(secret_from_bytes(&[0u8; 32]), Err(KeyError::InvalidKey));
        // The curve order n itself is not a valid secret key.
        let n = hex::decode(
            "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
        )
        .unwrap();
        assert_eq!(secret_from_bytes(&n), Err(KeyError::InvalidKey));
        assert!(secret_from_bytes(&[1u8; 32]).is_ok());
    }

    #[test]
    fn generator_pubkey() {
        let mut one = [0u8; 32];
        one[31] = 1;
        let sk = secret_from_bytes(&one).unwrap();
        let pk = public_key(&sk);
        assert_eq!(
            hex::encode(compressed(&pk)),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        );
        assert_eq!(uncompressed(&pk)[0], 0x04);
        assert_eq!(
            hex::encode(x_only(&pk)),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        );
    }

    #[test]
    fn sign_verify_roundtrip_low_s() {
        let sk = secret_from_bytes(&[7u8; 32]).unwrap();
        let pk = public_key(&sk);
        let digest = sha256(b"message");

        let sig = sign_ecdsa(&sk, digest);
        verify_ecdsa(&pk, digest, &sig).unwrap();
        assert!(is_low_s(&sig).unwrap());

        // A different digest must not verify.
        let other = sha256(b"other message");
        assert_eq!(
            verify_ecdsa(&pk, other, &sig),
            Err(KeyError::InvalidSignature),
        );
    }

    #[test]
    fn garbage_der_is_rejected() {
        let sk = secret_from_bytes(&[7u8; 32]).unwrap();
        let pk = public_key(&sk);
        assert_eq!(
            verify_ecdsa(&pk, [0u8; 32], b"not a signature"),
            Err(KeyError::InvalidSignature),
        );
    }
}
