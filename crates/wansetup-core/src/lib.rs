//! Core codec, crypto, and PKI library for the wansetup installer-package
//! toolchain: the framed-stream wire format (§[`wire`]), the compression
//! envelope (§[`envelope`]), the archive codec (§[`package`]), the
//! password-derived key pipeline (§[`password`]), the private key suite
//! (§[`suite`]), key signing requests (§[`ksr`]), the two-tier PKI
//! (§[`pki`]), and detached package signatures (§[`signing`]).

pub mod cancellation;
pub mod envelope;
pub mod error;
pub mod ksr;
pub mod package;
pub mod password;
pub mod pki;
pub mod pq;
pub mod security;
pub mod signing;
pub mod suite;
pub mod tpm;
pub mod wire;

pub use cancellation::CancellationToken;
pub use error::{Error, Result};

/// Home directory convention for the key suite and trust-store files.
pub fn default_config_dir() -> Result<std::path::PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".wansetup"))
        .ok_or_else(|| Error::InvalidFormat("no home directory for the current user".into()))
}

pub fn default_suite_path() -> Result<std::path::PathBuf> {
    Ok(default_config_dir()?.join("suite.bin"))
}

pub fn default_trust_store_path() -> Result<std::path::PathBuf> {
    Ok(default_config_dir()?.join("trust.bin"))
}
