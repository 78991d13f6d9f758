use thiserror::Error;

/// Error taxonomy for the wansetup package/key/PKI pipeline.
///
/// Every variant here maps to one row of the error-handling design: callers
/// match on these rather than on `anyhow::Error`, so the CLI facade can map
/// each one to its documented exit code.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("path traversal: {0}")]
    PathTraversal(String),

    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("untrusted package: {0}")]
    UntrustedPackage(String),

    #[error("TPM unavailable: {0}")]
    TpmUnavailable(String),

    #[error("password error: {0}")]
    PasswordError(String),

    #[error("password too long (max 255 bytes)")]
    PasswordTooLong,

    #[error("setup failed with exit code {0}")]
    SetupFailed(i32),

    #[error("operation cancelled")]
    Cancelled,

    #[error("already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
