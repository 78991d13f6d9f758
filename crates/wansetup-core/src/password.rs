//! C4: turns an operator-supplied password into the 64-byte key that backs
//! [`crate::suite::KeySuite::encrypt`]/`decrypt`. Every intermediate buffer
//! is a [`Zeroizing`] wrapper so a stage failure never leaves derived key
//! material sitting in a dropped `Vec`.

use std::io::Read;

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha3::{Sha3_384, Sha3_512};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::tpm::TpmBinding;

const MAX_PASSWORD_BYTES: usize = 255;
const PBKDF2_ITERATIONS: u32 = 250_000;
const PBKDF2_OUTPUT_LEN: usize = 64;
const ARGON2_MEMORY_KIB: u32 = 47_104;
const ARGON2_PARALLELISM: u32 = 1;
const ARGON2_OUTPUT_LEN: usize = 64;
const TPM_REBIND_INFO: &[u8] = b"wansetup/tpm-rebind/v1";

/// The finalized 64-byte key material fed into [`crate::suite::KeySuite`].
pub struct FinalizedKey(pub Zeroizing<[u8; 64]>);

impl FinalizedKey {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// Reads a password from `env_var` if set, otherwise from stdin until EOF.
/// Stdin input longer than 255 bytes is rejected rather than silently
/// truncated.
pub fn acquire(env_var: Option<&str>) -> Result<Zeroizing<Vec<u8>>> {
    if let Some(name) = env_var {
        if let Ok(value) = std::env::var(name) {
            let bytes = value.into_bytes();
            if bytes.len() > MAX_PASSWORD_BYTES {
                return Err(Error::PasswordTooLong);
            }
            return Ok(Zeroizing::new(bytes));
        }
    }
    let mut buf = Vec::new();
    std::io::stdin()
        .lock()
        .take(MAX_PASSWORD_BYTES as u64 + 1)
        .read_to_end(&mut buf)?;
    // trim a single trailing newline the way a terminal-entered password would carry
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    if buf.len() > MAX_PASSWORD_BYTES {
        return Err(Error::PasswordTooLong);
    }
    Ok(Zeroizing::new(buf))
}

/// Runs the full derivation pipeline: HMAC-SHA3-512(password, password) as
/// salt, PBKDF2-HMAC-SHA3-384, Argon2id, then optional TPM rebinding.
pub fn finalize(password: &[u8], tpm: Option<&dyn TpmBinding>) -> Result<FinalizedKey> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(Error::PasswordTooLong);
    }

    let salt = hmac_sha3_512_self_keyed(password)?;

    let mut pbkdf2_out = Zeroizing::new([0u8; PBKDF2_OUTPUT_LEN]);
    pbkdf2_hmac::<Sha3_384>(password, &salt, PBKDF2_ITERATIONS, pbkdf2_out.as_mut());

    let argon2_params = Params::new(
        ARGON2_MEMORY_KIB,
        Params::DEFAULT_T_COST,
        ARGON2_PARALLELISM,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| Error::PasswordError(format!("invalid argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);
    let mut argon2_out = Zeroizing::new([0u8; ARGON2_OUTPUT_LEN]);
    argon2
        .hash_password_into(&pbkdf2_out, &salt, argon2_out.as_mut())
        .map_err(|e| Error::PasswordError(format!("argon2id derivation failed: {e}")))?;

    let mut finalized = Zeroizing::new([0u8; 64]);
    finalized.copy_from_slice(&argon2_out[..]);

    if let Some(tpm) = tpm {
        let rebound = tpm.hmac(&finalized, password)?;
        // the token's HMAC mechanism may fall back to a shorter digest
        // (SHA-384, SHA-256); stretch whatever it returns back out to 64
        // bytes rather than assuming SHA-512-sized output.
        let hk = Hkdf::<Sha3_512>::new(None, &rebound);
        let mut stretched = Zeroizing::new([0u8; 64]);
        hk.expand(TPM_REBIND_INFO, stretched.as_mut()).map_err(|e| {
            Error::TpmUnavailable(format!(
                "TPM HMAC ({}) rebinding expand failed: {e}",
                tpm.digest_name()
            ))
        })?;
        finalized = stretched;
    }

    Ok(FinalizedKey(finalized))
}

fn hmac_sha3_512_self_keyed(password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    type HmacSha3_512 = Hmac<sha3::Sha3_512>;
    let mut mac = HmacSha3_512::new_from_slice(password)
        .map_err(|e| Error::PasswordError(format!("HMAC key setup failed: {e}")))?;
    mac.update(password);
    Ok(Zeroizing::new(mac.finalize().into_bytes().to_vec()))
}
