use anyhow::bail;
use argon2::{Algorithm, Argon2, Params, Version};
use cbc::cipher::{generic_array::GenericArray, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use serde::Deserialize;
use sha3::{Sha3_384, Sha3_512};

const PBKDF2_ITERATIONS: u32 = 250_000;
const PBKDF2_OUTPUT_LEN: usize = 64;
const ARGON2_MEMORY_KIB: u32 = 47_104;
const ARGON2_PARALLELISM: u32 = 1;
const ARGON2_OUTPUT_LEN: usize = 64;
const HKDF_ENC_INFO: &[u8] = b"wansetup/suite/enc/v1";
const HKDF_MAC_INFO: &[u8] = b"wansetup/suite/mac/v1";
const ENC_KEY_LEN: usize = 32;
const MAC_KEY_LEN: usize = 64;

type SerpentCbcEnc = cbc::Encryptor<serpent::Serpent>;
type HmacSha3_512 = Hmac<Sha3_512>;

/// Fixture format for one end-to-end run of the C4 key-derivation
/// pipeline and the C5a suite-at-rest encryption it feeds.
#[derive(Deserialize)]
struct Fixture {
    password_utf8: String,
    kdf: KdfFixture,
    suite: SuiteFixture,
}

#[derive(Deserialize)]
struct KdfFixture {
    salt_hex: String,
    pbkdf2_out_hex: String,
    final_key_hex: String,
}

#[derive(Deserialize)]
struct SuiteFixture {
    enc_key_hex: String,
    mac_key_hex: String,
    plaintext_hex: String,
    iv_hex: String,
    ciphertext_hex: String,
    tag_hex: String,
}

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .expect("usage: verify-suite fixture.json");
    let data = std::fs::read_to_string(path)?;
    let fixture: Fixture = serde_json::from_str(&data)?;

    let password = fixture.password_utf8.as_bytes();

    let mut mac = HmacSha3_512::new_from_slice(password)?;
    mac.update(password);
    let salt = mac.finalize().into_bytes().to_vec();
    let salt_expected = hex::decode(&fixture.kdf.salt_hex)?;
    if salt != salt_expected {
        bail!("self-keyed salt mismatch");
    }

    let mut pbkdf2_out = [0u8; PBKDF2_OUTPUT_LEN];
    pbkdf2_hmac::<Sha3_384>(password, &salt, PBKDF2_ITERATIONS, &mut pbkdf2_out);
    let pbkdf2_expected = hex::decode(&fixture.kdf.pbkdf2_out_hex)?;
    if pbkdf2_out.as_slice() != pbkdf2_expected {
        bail!("PBKDF2 output mismatch");
    }

    let params = Params::new(
        ARGON2_MEMORY_KIB,
        Params::DEFAULT_T_COST,
        ARGON2_PARALLELISM,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut final_key = [0u8; 64];
    argon2
        .hash_password_into(&pbkdf2_out, &salt, &mut final_key)
        .map_err(|e| anyhow::anyhow!("argon2id derivation failed: {e}"))?;
    let final_key_expected = hex::decode(&fixture.kdf.final_key_hex)?;
    if final_key.as_slice() != final_key_expected {
        bail!("finalized key mismatch");
    }

    let hk = Hkdf::<Sha3_384>::new(None, &final_key);
    let mut enc_key = [0u8; ENC_KEY_LEN];
    hk.expand(HKDF_ENC_INFO, &mut enc_key)
        .map_err(|e| anyhow::anyhow!("enc key expand failed: {e}"))?;
    let mut mac_key = [0u8; MAC_KEY_LEN];
    hk.expand(HKDF_MAC_INFO, &mut mac_key)
        .map_err(|e| anyhow::anyhow!("mac key expand failed: {e}"))?;
    if enc_key.as_slice() != hex::decode(&fixture.suite.enc_key_hex)? {
        bail!("suite enc key mismatch");
    }
    if mac_key.as_slice() != hex::decode(&fixture.suite.mac_key_hex)? {
        bail!("suite mac key mismatch");
    }

    let plaintext = hex::decode(&fixture.suite.plaintext_hex)?;
    let iv = hex::decode(&fixture.suite.iv_hex)?;
    let ciphertext = SerpentCbcEnc::new(
        GenericArray::from_slice(&enc_key),
        GenericArray::from_slice(&iv),
    )
    .encrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(&plaintext);
    if ciphertext != hex::decode(&fixture.suite.ciphertext_hex)? {
        bail!("ciphertext mismatch");
    }

    let mut tag_mac = HmacSha3_512::new_from_slice(&mac_key)?;
    tag_mac.update(&iv);
    tag_mac.update(&ciphertext);
    let tag = tag_mac.finalize().into_bytes();
    if tag.as_slice() != hex::decode(&fixture.suite.tag_hex)? {
        bail!("MAC tag mismatch");
    }

    println!("KDF/suite determinism OK");
    Ok(())
}
