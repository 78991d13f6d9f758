//! C5d: detached package signatures. A `.sig` file pairs a digest of the
//! package bytes, signed twice (primary + counter), with the signer's
//! vendor-issued [`SignedPublicKey`] so a verifier never has to consult a
//! separate key-lookup step.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_512};

use crate::error::{Error, Result};
use crate::pki::{HashAlgorithm, SignedPublicKey, TrustStore};
use crate::suite::{EcdsaKeyPair, KeySuite, LatticeKeyPair};

pub const PACKAGE_SIGNATURE_PURPOSE: &str = "wan24Setup installer package signature";
pub const PKI_DOMAIN: &str = "wan24Setup";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSignature {
    pub primary_signature: Vec<u8>,
    pub counter_signature: Vec<u8>,
    pub signer: SignedPublicKey,
    pub hash_algorithm: HashAlgorithm,
    pub purpose: String,
}

/// Streams `package_path` through SHA3-512 and signs the digest with both
/// suite keys. The whole file is never held in memory at once.
pub fn sign_package(suite: &KeySuite, package_path: &Path) -> Result<PackageSignature> {
    let signer = suite
        .signed_key
        .clone()
        .ok_or_else(|| Error::UntrustedPackage("suite has no vendor-signed key bundle".into()))?;

    let digest = digest_file(package_path)?;
    Ok(PackageSignature {
        primary_signature: suite.primary.sign(&digest),
        counter_signature: suite.counter.sign(&digest),
        signer,
        hash_algorithm: HashAlgorithm::Sha3_512,
        purpose: PACKAGE_SIGNATURE_PURPOSE.to_string(),
    })
}

/// Verifies a detached signature against `package_path`. Requires PKI
/// domain `"wan24Setup"`, both signatures to verify against the signer's
/// subject key, the purpose string to match exactly, and the signer's own
/// chain to resolve to a trusted anchor — unless `allow_unsigned`, in
/// which case a missing `sig` is tolerated by the caller before this
/// function is even invoked.
pub fn verify_package(
    package_path: &Path,
    sig: &PackageSignature,
    trust_store: &TrustStore,
    allow_unsigned: bool,
) -> Result<()> {
    let _ = allow_unsigned; // caller decides whether to call this at all when no .sig exists
    if sig.purpose != PACKAGE_SIGNATURE_PURPOSE {
        return Err(Error::UntrustedPackage(format!(
            "unexpected signature purpose: {}",
            sig.purpose
        )));
    }
    if sig.signer.domain != PKI_DOMAIN {
        return Err(Error::UntrustedPackage(format!(
            "signer domain {} is not {PKI_DOMAIN}",
            sig.signer.domain
        )));
    }

    trust_store.validate_chain(&sig.signer, PKI_DOMAIN)?;

    let digest = digest_file(package_path)?;
    EcdsaKeyPair::verify(&sig.signer.subject, &digest, &sig.primary_signature)?;
    LatticeKeyPair::verify(&sig.signer.counter_subject, &digest, &sig.counter_signature)?;

    Ok(())
}

fn digest_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut hasher = Sha3_512::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ksr::Ksr;
    use crate::pki::{sign_public_key, vendor_signer_id, TrustAnchor};
    use crate::suite::KeyAlgorithm;

    fn trusted_setup() -> (KeySuite, TrustStore) {
        let vendor = KeySuite::generate().unwrap();
        let mut store = TrustStore::new();
        store.add_anchor(
            vendor_signer_id(&vendor.primary.public_key_bytes()),
            TrustAnchor {
                public_key: vendor.primary.public_key_bytes(),
                algorithm: KeyAlgorithm::EcdsaP256,
                domain: PKI_DOMAIN.to_string(),
            },
        );
        store.add_anchor(
            vendor_signer_id(&vendor.counter.public_key_bytes()),
            TrustAnchor {
                public_key: vendor.counter.public_key_bytes(),
                algorithm: KeyAlgorithm::MlDsa87,
                domain: PKI_DOMAIN.to_string(),
            },
        );
        (vendor, store)
    }

    #[test]
    fn sign_and_verify_package_roundtrip() {
        let (vendor, store) = trusted_setup();
        let mut leaf = KeySuite::generate().unwrap();
        let ksr = Ksr::create(&leaf, PKI_DOMAIN, "dev@example.com").unwrap();
        let spk = sign_public_key(&vendor, &ksr).unwrap();
        leaf.finalize_with(spk);

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"package bytes go here").unwrap();

        let sig = sign_package(&leaf, tmp.path()).unwrap();
        verify_package(tmp.path(), &sig, &store, false).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_package() {
        let (vendor, store) = trusted_setup();
        let mut leaf = KeySuite::generate().unwrap();
        let ksr = Ksr::create(&leaf, PKI_DOMAIN, "dev@example.com").unwrap();
        let spk = sign_public_key(&vendor, &ksr).unwrap();
        leaf.finalize_with(spk);

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"original bytes").unwrap();
        let sig = sign_package(&leaf, tmp.path()).unwrap();

        std::fs::write(tmp.path(), b"tampered bytes!").unwrap();
        let err = verify_package(tmp.path(), &sig, &store, false).unwrap_err();
        assert!(matches!(err, Error::IntegrityFailure(_)));
    }

    #[test]
    fn verify_rejects_untrusted_signer() {
        let mut leaf = KeySuite::generate().unwrap();
        let rogue_vendor = KeySuite::generate().unwrap();
        let ksr = Ksr::create(&leaf, PKI_DOMAIN, "dev@example.com").unwrap();
        let spk = sign_public_key(&rogue_vendor, &ksr).unwrap();
        leaf.finalize_with(spk);

        let empty_store = TrustStore::new();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"package bytes").unwrap();
        let sig = sign_package(&leaf, tmp.path()).unwrap();

        let err = verify_package(tmp.path(), &sig, &empty_store, false).unwrap_err();
        assert!(matches!(err, Error::UntrustedPackage(_)));
    }
}
