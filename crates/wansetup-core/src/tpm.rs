//! Hardware root of trust for password finalization: a trait object so
//! [`crate::password::finalize`] never needs to know whether it's talking
//! to a real token or a test double, backed by `cryptoki` (PKCS#11) when
//! the `tpm` feature is on.

use crate::error::{Error, Result};

/// A hardware-backed keyed hash. Implementors pick the strongest digest
/// their token supports and report it via [`TpmBinding::digest_name`].
pub trait TpmBinding {
    fn hmac(&self, key: &[u8], msg: &[u8]) -> Result<Vec<u8>>;
    fn digest_name(&self) -> &'static str;
}

#[cfg(feature = "tpm")]
pub mod pkcs11 {
    use super::*;
    use cryptoki::context::{CInitializeArgs, Pkcs11};
    use cryptoki::mechanism::Mechanism;
    use cryptoki::object::{Attribute, KeyType, ObjectClass};
    use cryptoki::session::UserType;
    use cryptoki::slot::Slot;

    /// Binds to a configured PKCS#11 slot and token PIN, preferring
    /// SHA-512 and falling back to SHA-384 then SHA-256 when the token
    /// doesn't support the stronger mechanism.
    pub struct Pkcs11Tpm {
        pkcs11: Pkcs11,
        slot: Slot,
        pin: String,
        digest: &'static str,
    }

    impl Pkcs11Tpm {
        pub fn open(module_path: &str, slot_id: u64, pin: String) -> Result<Self> {
            let pkcs11 = Pkcs11::new(module_path)
                .map_err(|e| Error::TpmUnavailable(format!("failed to load module: {e}")))?;
            pkcs11
                .initialize(CInitializeArgs::OsThreads)
                .map_err(|e| Error::TpmUnavailable(format!("initialize failed: {e}")))?;
            let slots = pkcs11
                .get_slots_with_token()
                .map_err(|e| Error::TpmUnavailable(format!("no usable slots: {e}")))?;
            let slot = slots
                .into_iter()
                .find(|s| u64::from(*s) == slot_id)
                .ok_or_else(|| Error::TpmUnavailable(format!("slot {slot_id} not present")))?;
            Ok(Self {
                pkcs11,
                slot,
                pin,
                digest: "sha512",
            })
        }

        fn mechanism_for(&self, digest: &str) -> Option<Mechanism<'static>> {
            match digest {
                "sha512" => Some(Mechanism::Sha512HmacGeneral(64)),
                "sha384" => Some(Mechanism::Sha384HmacGeneral(48)),
                "sha256" => Some(Mechanism::Sha256HmacGeneral(32)),
                _ => None,
            }
        }
    }

    impl TpmBinding for Pkcs11Tpm {
        fn hmac(&self, key: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
            let session = self
                .pkcs11
                .open_rw_session(self.slot)
                .map_err(|e| Error::TpmUnavailable(format!("open session failed: {e}")))?;
            session
                .login(UserType::User, Some(&self.pin))
                .map_err(|e| Error::TpmUnavailable(format!("login failed: {e}")))?;

            let template = vec![
                Attribute::Class(ObjectClass::SECRET_KEY),
                Attribute::KeyType(KeyType::GENERIC_SECRET),
                Attribute::Value(key.to_vec()),
                Attribute::Sign(true),
                Attribute::Token(false),
            ];
            let handle = session
                .create_object(&template)
                .map_err(|e| Error::TpmUnavailable(format!("key import failed: {e}")))?;

            for digest in ["sha512", "sha384", "sha256"] {
                let Some(mechanism) = self.mechanism_for(digest) else {
                    continue;
                };
                match session.sign(&mechanism, handle, msg) {
                    Ok(sig) => return Ok(sig),
                    Err(_) => continue,
                }
            }
            Err(Error::TpmUnavailable(
                "no supported HMAC mechanism on token".into(),
            ))
        }

        fn digest_name(&self) -> &'static str {
            self.digest
        }
    }

}

#[cfg(not(feature = "tpm"))]
pub struct Unavailable;

#[cfg(not(feature = "tpm"))]
impl TpmBinding for Unavailable {
    fn hmac(&self, _key: &[u8], _msg: &[u8]) -> Result<Vec<u8>> {
        Err(Error::TpmUnavailable(
            "built without the `tpm` feature".into(),
        ))
    }

    fn digest_name(&self) -> &'static str {
        "unavailable"
    }
}
