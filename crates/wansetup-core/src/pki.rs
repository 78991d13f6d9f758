//! C5c: the two-tier PKI. A vendor root (the trust anchor) signs
//! installer-signing keys via [`sign_public_key`]; a [`TrustStore`] walks
//! that chain back to an anchor at verification time.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ksr::Ksr;
use crate::suite::{EcdsaKeyPair, KeyAlgorithm, KeySuite, LatticeKeyPair};
use crate::wire::{Reader, Writer};

pub const SIGN_KEY_PURPOSE: &str =
    "wan24Setup installer package signing permitted public signature key";

/// Which digest a [`PkiSignature`] was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha3_512,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkiSignature {
    pub signer_id: String,
    pub timestamp: u64,
    pub hash_algorithm: HashAlgorithm,
    pub purpose: String,
    pub bytes: Vec<u8>,
}

/// A public key vouched for by one or more signatures — one per tier of
/// the chain. This implementation is two-tier: a leaf (installer) signing
/// key signed directly by a vendor root anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPublicKey {
    pub subject: Vec<u8>,
    pub algorithm: KeyAlgorithm,
    /// The counter-signature (ML-DSA-87) public key tied to the same
    /// suite identity, certified by the same signature chain below.
    pub counter_subject: Vec<u8>,
    pub domain: String,
    pub signatures: Vec<PkiSignature>,
}

/// A vendor root anchor trusted unconditionally: its own public key plus
/// the domain it is allowed to vouch for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustAnchor {
    pub public_key: Vec<u8>,
    pub algorithm: KeyAlgorithm,
    pub domain: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TrustStore {
    pub anchors: HashMap<String, TrustAnchor>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_anchor(&mut self, id: impl Into<String>, anchor: TrustAnchor) {
        self.anchors.insert(id.into(), anchor);
    }

    /// Persists the store as one framed blob: serializer-version tag
    /// (from [`crate::wire`]), varint length, postcard payload.
    pub fn save(&self, mut dest: impl Write) -> Result<()> {
        let payload = postcard::to_allocvec(self)?;
        let mut w = Writer::new(&mut dest)?;
        w.write_varint(payload.len() as u64)?;
        w.write_bytes(&payload)?;
        Ok(())
    }

    pub fn load(src: impl Read) -> Result<Self> {
        let mut r = Reader::new(src)?;
        let len = r.read_varint()? as usize;
        let bytes = r.read_exact_bytes(len)?;
        Ok(postcard::from_bytes(&bytes)?)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.save(file)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::load(file)
    }

    /// Walks `spk`'s signature chain and succeeds iff every signature
    /// verifies against its claimed signer and the chain terminates in an
    /// anchor trusted for `required_domain`.
    pub fn validate_chain(&self, spk: &SignedPublicKey, required_domain: &str) -> Result<()> {
        if spk.domain != required_domain {
            return Err(Error::UntrustedPackage(format!(
                "signed key domain {} does not match required domain {required_domain}",
                spk.domain
            )));
        }
        if spk.signatures.is_empty() {
            return Err(Error::UntrustedPackage("signed key carries no signatures".into()));
        }

        let digest = subject_digest(&spk.subject, &spk.counter_subject, &spk.domain);

        for sig in &spk.signatures {
            let anchor = self
                .anchors
                .get(&sig.signer_id)
                .ok_or_else(|| Error::UntrustedPackage(format!("unknown signer {}", sig.signer_id)))?;
            if anchor.domain != required_domain {
                return Err(Error::UntrustedPackage(format!(
                    "anchor {} is not trusted for domain {required_domain}",
                    sig.signer_id
                )));
            }
            verify_with_algorithm(anchor.algorithm, &anchor.public_key, &digest, &sig.bytes)?;
        }
        Ok(())
    }
}

/// Digest certified by the chain: binds the primary key, the counter key,
/// and the domain together so neither half can be swapped independently
/// once signed.
fn subject_digest(subject: &[u8], counter_subject: &[u8], domain: &str) -> Vec<u8> {
    use sha3::{Digest, Sha3_512};
    let mut hasher = Sha3_512::new();
    hasher.update(b"wansetup/pki/subject/v1\n");
    hasher.update(domain.as_bytes());
    hasher.update((subject.len() as u64).to_be_bytes());
    hasher.update(subject);
    hasher.update((counter_subject.len() as u64).to_be_bytes());
    hasher.update(counter_subject);
    hasher.finalize().to_vec()
}

fn verify_with_algorithm(algorithm: KeyAlgorithm, public_key: &[u8], msg: &[u8], sig: &[u8]) -> Result<()> {
    match algorithm {
        KeyAlgorithm::EcdsaP256 => EcdsaKeyPair::verify(public_key, msg, sig),
        KeyAlgorithm::MlDsa87 => LatticeKeyPair::verify(public_key, msg, sig),
    }
}

/// Implements "sign KSR": verify the request, then sign the requester's
/// primary public key with the vendor's primary key and counter-sign
/// with the vendor's lattice key.
pub fn sign_public_key(vendor_suite: &KeySuite, ksr: &Ksr) -> Result<SignedPublicKey> {
    ksr.validate()?;

    let domain = ksr
        .attributes
        .get("pki.domain")
        .ok_or_else(|| Error::InvalidFormat("KSR missing pki.domain".into()))?
        .clone();

    let digest = subject_digest(&ksr.primary_public, &ksr.counter_public, &domain);
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let primary_sig = PkiSignature {
        signer_id: vendor_signer_id(&vendor_suite.primary.public_key_bytes()),
        timestamp,
        hash_algorithm: HashAlgorithm::Sha3_512,
        purpose: SIGN_KEY_PURPOSE.to_string(),
        bytes: vendor_suite.primary.sign(&digest),
    };
    let counter_sig = PkiSignature {
        signer_id: vendor_signer_id(&vendor_suite.counter.public_key_bytes()),
        timestamp,
        hash_algorithm: HashAlgorithm::Sha3_512,
        purpose: SIGN_KEY_PURPOSE.to_string(),
        bytes: vendor_suite.counter.sign(&digest),
    };

    Ok(SignedPublicKey {
        subject: ksr.primary_public.clone(),
        algorithm: KeyAlgorithm::EcdsaP256,
        counter_subject: ksr.counter_public.clone(),
        domain,
        signatures: vec![primary_sig, counter_sig],
    })
}

/// A signer's identity inside a trust store is the hex SHA3-512 digest of
/// its public key bytes.
pub fn vendor_signer_id(public_key: &[u8]) -> String {
    use sha3::{Digest, Sha3_512};
    let mut hasher = Sha3_512::new();
    hasher.update(b"wansetup/pki/signer-id/v1\n");
    hasher.update(public_key);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchors_from(vendor: &KeySuite) -> TrustStore {
        let mut store = TrustStore::new();
        store.add_anchor(
            vendor_signer_id(&vendor.primary.public_key_bytes()),
            TrustAnchor {
                public_key: vendor.primary.public_key_bytes(),
                algorithm: KeyAlgorithm::EcdsaP256,
                domain: "wan24Setup".to_string(),
            },
        );
        store.add_anchor(
            vendor_signer_id(&vendor.counter.public_key_bytes()),
            TrustAnchor {
                public_key: vendor.counter.public_key_bytes(),
                algorithm: KeyAlgorithm::MlDsa87,
                domain: "wan24Setup".to_string(),
            },
        );
        store
    }

    #[test]
    fn sign_and_validate_chain() {
        let vendor = KeySuite::generate().unwrap();
        let leaf = KeySuite::generate().unwrap();
        let ksr = Ksr::create(&leaf, "wan24Setup", "dev@example.com").unwrap();

        let spk = sign_public_key(&vendor, &ksr).unwrap();
        let store = anchors_from(&vendor);
        store.validate_chain(&spk, "wan24Setup").unwrap();
    }

    #[test]
    fn validate_chain_rejects_wrong_domain() {
        let vendor = KeySuite::generate().unwrap();
        let leaf = KeySuite::generate().unwrap();
        let ksr = Ksr::create(&leaf, "wan24Setup", "dev@example.com").unwrap();

        let spk = sign_public_key(&vendor, &ksr).unwrap();
        let store = anchors_from(&vendor);
        let err = store.validate_chain(&spk, "other-domain").unwrap_err();
        assert!(matches!(err, Error::UntrustedPackage(_)));
    }

    #[test]
    fn validate_chain_rejects_unknown_signer() {
        let vendor = KeySuite::generate().unwrap();
        let leaf = KeySuite::generate().unwrap();
        let ksr = Ksr::create(&leaf, "wan24Setup", "dev@example.com").unwrap();

        let spk = sign_public_key(&vendor, &ksr).unwrap();
        let empty_store = TrustStore::new();
        let err = empty_store.validate_chain(&spk, "wan24Setup").unwrap_err();
        assert!(matches!(err, Error::UntrustedPackage(_)));
    }

    #[test]
    fn trust_store_roundtrips_through_wire_blob() {
        let vendor = KeySuite::generate().unwrap();
        let store = anchors_from(&vendor);
        let mut buf = Vec::new();
        store.save(&mut buf).unwrap();
        let restored = TrustStore::load(buf.as_slice()).unwrap();
        assert_eq!(restored.anchors.len(), store.anchors.len());
    }
}
