use thiserror::Error;

/// Errors surfaced by keychain operations.
///
/// Every error is reported to the caller; nothing is recovered
/// internally. Concurrency races show up as [`KeychainError::DuplicateKey`]
/// or [`KeychainError::KeyNotFound`] so the caller can retry. Messages
/// name the offending key and keep the underlying I/O message, but never
/// contain the derived encryption key, a passphrase, or unwrapped key
/// material.
#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("invalid key name '{0}'")]
    InvalidName(String),

    #[error("invalid key type '{0}', expected 'rsa'")]
    InvalidKeyType(String),

    #[error("invalid RSA key size {0}, expected at least 2048 bits")]
    InvalidKeySize(u32),

    #[error("invalid keychain configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("passphrase must be at least {min} characters")]
    WeakPassphrase { min: usize },

    #[error("key '{0}' already exists")]
    DuplicateKey(String),

    #[error("key '{0}' does not exist")]
    KeyNotFound(String),

    #[error("wrong password for key '{0}'")]
    WrongPassword(String),

    #[error("invalid CMS envelope: {0}")]
    InvalidCms(String),

    #[error("no stored key matches any recipient of the envelope")]
    NoDecryptionKey,

    #[error("store I/O failure: {0}")]
    StoreIo(String),

    #[error("RSA key generation failed: {0}")]
    KeyGenFailed(String),

    #[error("crypto operation failed: {0}")]
    CryptoFailure(String),
}

impl From<openssl::error::ErrorStack> for KeychainError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        KeychainError::CryptoFailure(e.to_string())
    }
}

impl From<std::io::Error> for KeychainError {
    fn from(e: std::io::Error) -> Self {
        KeychainError::StoreIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KeychainError>;
