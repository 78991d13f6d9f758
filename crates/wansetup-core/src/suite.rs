//! C5a: the private key suite an operator generates once and re-uses for
//! every `sign-key`/`create` invocation. Two keypairs live side by side —
//! ECDSA P-256 for the primary signature and ML-DSA-87 for the
//! post-quantum counter-signature — plus, once the suite has been through
//! the PKI (§10), the vendor-issued [`SignedPublicKey`] for each half.

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ecdsa::signature::{Signer, Verifier};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Sha3_384, Sha3_512};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::password::FinalizedKey;
use crate::pki::SignedPublicKey;
use crate::pq::mldsa;

type SerpentCbcEnc = cbc::Encryptor<serpent::Serpent>;
type SerpentCbcDec = cbc::Decryptor<serpent::Serpent>;
type HmacSha3_512 = Hmac<Sha3_512>;

const ENC_KEY_LEN: usize = 32;
const MAC_KEY_LEN: usize = 64;
const MAC_TAG_LEN: usize = 64;
const IV_LEN: usize = 16;
const HKDF_ENC_INFO: &[u8] = b"wansetup/suite/enc/v1";
const HKDF_MAC_INFO: &[u8] = b"wansetup/suite/mac/v1";

/// Which signature algorithm a [`SignedPublicKey`] or [`PkiSignature`]
/// (see [`crate::pki`]) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    EcdsaP256,
    MlDsa87,
}

/// ECDSA P-256 keypair — the primary signature key. P-256 is the only
/// curve this workspace depends on, so it is "the largest allowed curve"
/// by construction.
pub struct EcdsaKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl EcdsaKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(true).as_bytes().to_vec()
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let sig: EcdsaSignature = self.signing_key.sign(msg);
        sig.to_bytes().to_vec()
    }

    pub fn verify(public_key: &[u8], msg: &[u8], sig: &[u8]) -> Result<()> {
        let vk = VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|e| Error::InvalidFormat(format!("malformed ECDSA public key: {e}")))?;
        let signature = EcdsaSignature::try_from(sig)
            .map_err(|e| Error::InvalidFormat(format!("malformed ECDSA signature: {e}")))?;
        vk.verify(msg, &signature)
            .map_err(|_| Error::IntegrityFailure("ECDSA P-256 signature verification failed".into()))
    }

    fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| Error::InvalidFormat(format!("malformed ECDSA secret key: {e}")))?;
        let verifying_key = VerifyingKey::from(&signing_key);
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }
}

/// ML-DSA-87 keypair — the post-quantum counter-signature key.
pub struct LatticeKeyPair {
    public_key: mldsa::PublicKey,
    secret_key: mldsa::SecretKey,
}

impl LatticeKeyPair {
    pub fn generate() -> Self {
        let (public_key, secret_key) = mldsa::keypair();
        Self {
            public_key,
            secret_key,
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        mldsa::public_key_bytes(&self.public_key).to_vec()
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        mldsa::signature_bytes(&mldsa::sign_detached(msg, &self.secret_key)).to_vec()
    }

    pub fn verify(public_key: &[u8], msg: &[u8], sig: &[u8]) -> Result<()> {
        let pk = mldsa::public_key_from_bytes(public_key)?;
        let signature = mldsa::signature_from_bytes(sig)?;
        if mldsa::verify_detached(&signature, msg, &pk) {
            Ok(())
        } else {
            Err(Error::IntegrityFailure(
                "ML-DSA-87 signature verification failed".into(),
            ))
        }
    }

    fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(mldsa::secret_key_bytes(&self.secret_key).to_vec())
    }

    fn from_parts(public: &[u8], secret: &[u8]) -> Result<Self> {
        Ok(Self {
            public_key: mldsa::public_key_from_bytes(public)?,
            secret_key: mldsa::secret_key_from_bytes(secret)?,
        })
    }
}

/// The full private key suite: both live keypairs plus the vendor-signed
/// public key bundle the PKI stage (§10) has attached so far. One
/// [`SignedPublicKey`] covers both halves — its `subject`/`counter_subject`
/// pair binds the primary and counter keys under a single signature chain,
/// so there is nothing for a second, per-key signed artifact to hold.
pub struct KeySuite {
    pub primary: EcdsaKeyPair,
    pub counter: LatticeKeyPair,
    pub signed_key: Option<SignedPublicKey>,
}

#[derive(Serialize, Deserialize)]
struct SuitePayload {
    primary_secret: Vec<u8>,
    counter_public: Vec<u8>,
    counter_secret: Vec<u8>,
    signed_key: Option<SignedPublicKey>,
}

impl KeySuite {
    pub fn generate() -> Result<Self> {
        Ok(Self {
            primary: EcdsaKeyPair::generate(),
            counter: LatticeKeyPair::generate(),
            signed_key: None,
        })
    }

    /// Attaches the vendor-signed public key bundle produced by
    /// [`crate::pki::sign_public_key`] for this suite.
    pub fn finalize_with(&mut self, spk: SignedPublicKey) {
        self.signed_key = Some(spk);
    }

    /// Encrypts the suite (both secret keys and both signed-public-key
    /// envelopes) for at-rest storage: Serpent-256-CBC with PKCS7
    /// padding, then HMAC-SHA3-512 over `iv || ciphertext` (encrypt-then-MAC).
    pub fn encrypt(&self, key: &FinalizedKey) -> Result<Vec<u8>> {
        let (enc_key, mac_key) = split_keys(key)?;

        let payload = SuitePayload {
            primary_secret: self.primary.secret_bytes().to_vec(),
            counter_public: self.counter.public_key_bytes(),
            counter_secret: self.counter.secret_bytes().to_vec(),
            signed_key: self.signed_key.clone(),
        };
        let plaintext = postcard::to_allocvec(&payload)?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let ciphertext =
            SerpentCbcEnc::new(GenericArray::from_slice(&enc_key), GenericArray::from_slice(&iv))
                .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        let mut mac = HmacSha3_512::new_from_slice(&mac_key)
            .map_err(|e| Error::PasswordError(format!("HMAC key setup failed: {e}")))?;
        mac.update(&iv);
        mac.update(&ciphertext);
        let tag = mac.finalize().into_bytes();

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len() + MAC_TAG_LEN);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Decrypts and verifies a suite produced by [`KeySuite::encrypt`].
    /// A MAC mismatch or padding failure never yields partial plaintext —
    /// the MAC is checked before the ciphertext is touched.
    pub fn decrypt(bytes: &[u8], key: &FinalizedKey) -> Result<Self> {
        if bytes.len() < IV_LEN + MAC_TAG_LEN {
            return Err(Error::IntegrityFailure("key suite blob is too short".into()));
        }
        let (iv, rest) = bytes.split_at(IV_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - MAC_TAG_LEN);

        let (enc_key, mac_key) = split_keys(key)?;

        let mut mac = HmacSha3_512::new_from_slice(&mac_key)
            .map_err(|e| Error::PasswordError(format!("HMAC key setup failed: {e}")))?;
        mac.update(iv);
        mac.update(ciphertext);
        mac.verify_slice(tag)
            .map_err(|_| Error::IntegrityFailure("key suite MAC verification failed".into()))?;

        let plaintext =
            SerpentCbcDec::new(GenericArray::from_slice(&enc_key), GenericArray::from_slice(iv))
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| Error::IntegrityFailure("key suite padding verification failed".into()))?;

        let payload: SuitePayload = postcard::from_bytes(&plaintext)?;
        Ok(Self {
            primary: EcdsaKeyPair::from_secret_bytes(&payload.primary_secret)?,
            counter: LatticeKeyPair::from_parts(&payload.counter_public, &payload.counter_secret)?,
            signed_key: payload.signed_key,
        })
    }
}

/// Domain-separated HKDF split of the 64-byte finalized password key into
/// an encryption sub-key and a MAC sub-key.
fn split_keys(key: &FinalizedKey) -> Result<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>)> {
    let hk = Hkdf::<Sha3_384>::new(None, key.as_bytes());

    let mut enc_key = Zeroizing::new(vec![0u8; ENC_KEY_LEN]);
    hk.expand(HKDF_ENC_INFO, &mut enc_key)
        .map_err(|e| Error::PasswordError(format!("HKDF expand (enc) failed: {e}")))?;

    let mut mac_key = Zeroizing::new(vec![0u8; MAC_KEY_LEN]);
    hk.expand(HKDF_MAC_INFO, &mut mac_key)
        .map_err(|e| Error::PasswordError(format!("HKDF expand (mac) failed: {e}")))?;

    Ok((enc_key, mac_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::finalize;

    #[test]
    fn ecdsa_sign_verify_roundtrip() {
        let pair = EcdsaKeyPair::generate();
        let sig = pair.sign(b"hello package");
        EcdsaKeyPair::verify(&pair.public_key_bytes(), b"hello package", &sig).unwrap();
    }

    #[test]
    fn mldsa_sign_verify_roundtrip() {
        let pair = LatticeKeyPair::generate();
        let sig = pair.sign(b"hello package");
        LatticeKeyPair::verify(&pair.public_key_bytes(), b"hello package", &sig).unwrap();
    }

    #[test]
    fn suite_encrypt_decrypt_roundtrip() {
        let key = finalize(b"hunter2hunter2", None).unwrap();
        let suite = KeySuite::generate().unwrap();
        let primary_pub = suite.primary.public_key_bytes();
        let counter_pub = suite.counter.public_key_bytes();

        let blob = suite.encrypt(&key).unwrap();
        let restored = KeySuite::decrypt(&blob, &key).unwrap();

        assert_eq!(restored.primary.public_key_bytes(), primary_pub);
        assert_eq!(restored.counter.public_key_bytes(), counter_pub);
    }

    #[test]
    fn suite_decrypt_rejects_tampered_blob() {
        let key = finalize(b"hunter2hunter2", None).unwrap();
        let suite = KeySuite::generate().unwrap();
        let mut blob = suite.encrypt(&key).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        let err = KeySuite::decrypt(&blob, &key).unwrap_err();
        assert!(matches!(err, Error::IntegrityFailure(_)));
    }

    #[test]
    fn suite_decrypt_rejects_wrong_password() {
        let key = finalize(b"hunter2hunter2", None).unwrap();
        let wrong_key = finalize(b"wrong-password!", None).unwrap();
        let suite = KeySuite::generate().unwrap();
        let blob = suite.encrypt(&key).unwrap();
        let err = KeySuite::decrypt(&blob, &wrong_key).unwrap_err();
        assert!(matches!(err, Error::IntegrityFailure(_)));
    }
}
