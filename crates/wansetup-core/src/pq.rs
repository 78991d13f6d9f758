//! Thin wrapper around the post-quantum counter-signature primitive
//! (ML-DSA-87 / FIPS 204, highest NIST security level parameter set). Kept
//! as its own module so [`crate::suite`] never imports `pqcrypto_mldsa`
//! directly — only this file knows which concrete algorithm backs
//! "counter signature".

#[cfg(feature = "pq")]
pub mod mldsa {
    pub use pqcrypto_mldsa::mldsa87::*;
    use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};

    pub fn keypair() -> (PublicKey, SecretKey) {
        pqcrypto_mldsa::mldsa87::keypair()
    }

    pub fn sign_detached(msg: &[u8], sk: &SecretKey) -> DetachedSignature {
        pqcrypto_mldsa::mldsa87::detached_sign(msg, sk)
    }

    pub fn verify_detached(sig: &DetachedSignature, msg: &[u8], pk: &PublicKey) -> bool {
        pqcrypto_mldsa::mldsa87::verify_detached_signature(sig, msg, pk).is_ok()
    }

    pub fn public_key_bytes(pk: &PublicKey) -> &[u8] {
        pk.as_bytes()
    }

    pub fn secret_key_bytes(sk: &SecretKey) -> &[u8] {
        sk.as_bytes()
    }

    pub fn signature_bytes(sig: &DetachedSignature) -> &[u8] {
        sig.as_bytes()
    }

    pub fn public_key_from_bytes(bytes: &[u8]) -> crate::error::Result<PublicKey> {
        pqcrypto_traits::sign::PublicKey::from_bytes(bytes)
            .map_err(|_| crate::error::Error::InvalidFormat("malformed ML-DSA public key".into()))
    }

    pub fn secret_key_from_bytes(bytes: &[u8]) -> crate::error::Result<SecretKey> {
        pqcrypto_traits::sign::SecretKey::from_bytes(bytes)
            .map_err(|_| crate::error::Error::InvalidFormat("malformed ML-DSA secret key".into()))
    }

    pub fn signature_from_bytes(bytes: &[u8]) -> crate::error::Result<DetachedSignature> {
        pqcrypto_traits::sign::DetachedSignature::from_bytes(bytes)
            .map_err(|_| crate::error::Error::InvalidFormat("malformed ML-DSA signature".into()))
    }
}
