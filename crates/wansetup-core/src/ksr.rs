//! C5b: key signing requests. A KSR bundles a suite's primary public key
//! with a small set of mandatory attributes and self-signs the canonical
//! encoding of both — the thing a vendor actually countersigns in
//! [`crate::pki::sign_public_key`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::suite::{EcdsaKeyPair, KeySuite};

pub const PURPOSE: &str = "wan24Setup installer package signing";

const ATTR_PKI_DOMAIN: &str = "pki.domain";
const ATTR_OWNER_EMAIL: &str = "owner.email";
const ATTR_USAGES: &str = "usages";
const ATTR_PRIMARY_ID: &str = "key.primary.id";
const ATTR_COUNTER_ID: &str = "key.counter.id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ksr {
    pub primary_public: Vec<u8>,
    pub counter_public: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    pub purpose: String,
    pub self_signature: Vec<u8>,
}

impl Ksr {
    /// Builds and self-signs a request for `suite`, fixing the mandatory
    /// attribute keys spec §9 requires.
    pub fn create(suite: &KeySuite, pki_domain: &str, owner_email: &str) -> Result<Ksr> {
        if pki_domain.is_empty() {
            return Err(Error::InvalidFormat("pki.domain must not be empty".into()));
        }
        if !owner_email.contains('@') {
            return Err(Error::InvalidFormat("owner.email must contain '@'".into()));
        }

        let primary_public = suite.primary.public_key_bytes();
        let counter_public = suite.counter.public_key_bytes();

        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_PKI_DOMAIN.to_string(), pki_domain.to_string());
        attributes.insert(ATTR_OWNER_EMAIL.to_string(), owner_email.to_lowercase());
        attributes.insert(ATTR_USAGES.to_string(), "sign,counter-sign".to_string());
        attributes.insert(ATTR_PRIMARY_ID.to_string(), hex::encode(&primary_public));
        attributes.insert(ATTR_COUNTER_ID.to_string(), hex::encode(&counter_public));

        let canonical = canonical_encoding(&primary_public, &counter_public, &attributes, PURPOSE);
        let self_signature = suite.primary.sign(&canonical);

        Ok(Ksr {
            primary_public,
            counter_public,
            attributes,
            purpose: PURPOSE.to_string(),
            self_signature,
        })
    }

    /// Verifies the self-signature and that every mandatory attribute is
    /// present and syntactically valid — the "deeper request validation"
    /// a vendor runs before countersigning.
    pub fn validate(&self) -> Result<()> {
        let canonical = canonical_encoding(&self.primary_public, &self.counter_public, &self.attributes, &self.purpose);
        EcdsaKeyPair::verify(&self.primary_public, &canonical, &self.self_signature)?;

        let domain = self
            .attributes
            .get(ATTR_PKI_DOMAIN)
            .ok_or_else(|| Error::InvalidFormat(format!("KSR missing {ATTR_PKI_DOMAIN}")))?;
        if domain.is_empty() {
            return Err(Error::InvalidFormat(format!("{ATTR_PKI_DOMAIN} is empty")));
        }

        let email = self
            .attributes
            .get(ATTR_OWNER_EMAIL)
            .ok_or_else(|| Error::InvalidFormat(format!("KSR missing {ATTR_OWNER_EMAIL}")))?;
        if !email.contains('@') {
            return Err(Error::InvalidFormat(format!(
                "{ATTR_OWNER_EMAIL} does not look like an email address"
            )));
        }

        let primary_id = self
            .attributes
            .get(ATTR_PRIMARY_ID)
            .ok_or_else(|| Error::InvalidFormat(format!("KSR missing {ATTR_PRIMARY_ID}")))?;
        validate_hex_id(primary_id, ATTR_PRIMARY_ID)?;

        let counter_id = self
            .attributes
            .get(ATTR_COUNTER_ID)
            .ok_or_else(|| Error::InvalidFormat(format!("KSR missing {ATTR_COUNTER_ID}")))?;
        validate_hex_id(counter_id, ATTR_COUNTER_ID)?;

        if self.purpose != PURPOSE {
            return Err(Error::InvalidFormat(format!(
                "unexpected KSR purpose: {}",
                self.purpose
            )));
        }

        Ok(())
    }
}

fn validate_hex_id(value: &str, attr: &str) -> Result<()> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidFormat(format!("{attr} is not valid hex")));
    }
    Ok(())
}

/// Deterministic byte encoding used both to self-sign and, later, for a
/// vendor to countersign: public key length-prefixed, attributes sorted
/// by key (guaranteed by `BTreeMap` iteration order), then the purpose
/// string.
fn canonical_encoding(
    primary_public: &[u8],
    counter_public: &[u8],
    attributes: &BTreeMap<String, String>,
    purpose: &str,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"wansetup/ksr/v1\n");
    buf.extend_from_slice(&(primary_public.len() as u64).to_be_bytes());
    buf.extend_from_slice(primary_public);
    buf.extend_from_slice(&(counter_public.len() as u64).to_be_bytes());
    buf.extend_from_slice(counter_public);
    for (k, v) in attributes {
        buf.extend_from_slice(&(k.len() as u64).to_be_bytes());
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(&(v.len() as u64).to_be_bytes());
        buf.extend_from_slice(v.as_bytes());
    }
    buf.extend_from_slice(&(purpose.len() as u64).to_be_bytes());
    buf.extend_from_slice(purpose.as_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_validate_roundtrip() {
        let suite = KeySuite::generate().unwrap();
        let ksr = Ksr::create(&suite, "wan24Setup", "vendor@example.com").unwrap();
        ksr.validate().unwrap();
    }

    #[test]
    fn rejects_empty_domain() {
        let suite = KeySuite::generate().unwrap();
        let err = Ksr::create(&suite, "", "vendor@example.com").unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn rejects_email_without_at() {
        let suite = KeySuite::generate().unwrap();
        let err = Ksr::create(&suite, "wan24Setup", "not-an-email").unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn validate_rejects_tampered_attribute() {
        let suite = KeySuite::generate().unwrap();
        let mut ksr = Ksr::create(&suite, "wan24Setup", "vendor@example.com").unwrap();
        ksr.attributes.insert(ATTR_OWNER_EMAIL.to_string(), "tampered@example.com".to_string());
        let err = ksr.validate().unwrap_err();
        assert!(matches!(err, Error::IntegrityFailure(_)));
    }
}
