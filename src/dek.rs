//! Derived encryption key (DEK).
//!
//! The DEK is the PBKDF2 output of the chain passphrase. It wraps every
//! private key the chain stores. The derived bytes are kept as lowercase
//! hex text because the PKCS#8 wrapping layer consumes passphrases as
//! text, and the whole value lives inside a [`SecretString`] so it is
//! zeroized when the chain is dropped and never shows up in debug output.

use openssl::hash::MessageDigest;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::{KeychainError, Result};

/// Minimum passphrase length in characters.
pub const MIN_PASSPHRASE_LEN: usize = 20;
/// Minimum PBKDF2 output length in bytes (112 bits).
pub const MIN_KEY_LENGTH: usize = 14;
/// Minimum salt length in bytes (128 bits).
pub const MIN_SALT_LEN: usize = 16;
/// Minimum PBKDF2 iteration count.
pub const MIN_ITERATION_COUNT: u32 = 1000;

/// Hash algorithm for PBKDF2 derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DekHash {
    Sha256,
    Sha512,
}

impl DekHash {
    fn digest(self) -> MessageDigest {
        match self {
            DekHash::Sha256 => MessageDigest::sha256(),
            DekHash::Sha512 => MessageDigest::sha512(),
        }
    }
}

/// PBKDF2 profile for deriving the DEK.
///
/// Every field has a recommended default; the salt default is a
/// placeholder and callers must override it with a value of their own.
#[derive(Debug, Clone, Deserialize)]
pub struct DekConfig {
    /// Derived key length in bytes.
    #[serde(default = "default_key_length")]
    pub key_length: usize,
    /// PBKDF2 iteration count.
    #[serde(default = "default_iteration_count")]
    pub iteration_count: u32,
    /// Salt text, at least 16 bytes.
    #[serde(default = "default_salt")]
    pub salt: String,
    /// PBKDF2 PRF hash.
    #[serde(default = "default_hash")]
    pub hash: DekHash,
}

impl Default for DekConfig {
    fn default() -> Self {
        Self {
            key_length: default_key_length(),
            iteration_count: default_iteration_count(),
            salt: default_salt(),
            hash: default_hash(),
        }
    }
}

fn default_key_length() -> usize {
    64
}

fn default_iteration_count() -> u32 {
    10_000
}

fn default_salt() -> String {
    "you should override this salt".to_string()
}

fn default_hash() -> DekHash {
    DekHash::Sha512
}

/// The passphrase-derived symmetric secret wrapping every stored PEM.
///
/// Constructed once when the chain is built, read-only afterwards.
/// Exposed only through a crate-private accessor.
#[derive(Debug)]
pub(crate) struct Dek {
    hex: SecretString,
    iteration_count: u32,
}

impl Dek {
    /// Derive the DEK from a passphrase, enforcing the NIST floors.
    pub(crate) fn derive(passphrase: &SecretString, cfg: &DekConfig) -> Result<Self> {
        if passphrase.expose_secret().chars().count() < MIN_PASSPHRASE_LEN {
            return Err(KeychainError::WeakPassphrase {
                min: MIN_PASSPHRASE_LEN,
            });
        }
        if cfg.key_length < MIN_KEY_LENGTH {
            return Err(KeychainError::InvalidConfig(format!(
                "dek key length {} below minimum of {} bytes",
                cfg.key_length, MIN_KEY_LENGTH
            )));
        }
        if cfg.salt.len() < MIN_SALT_LEN {
            return Err(KeychainError::InvalidConfig(format!(
                "dek salt is {} bytes, minimum is {}",
                cfg.salt.len(),
                MIN_SALT_LEN
            )));
        }
        if cfg.iteration_count < MIN_ITERATION_COUNT {
            return Err(KeychainError::InvalidConfig(format!(
                "dek iteration count {} below minimum of {}",
                cfg.iteration_count, MIN_ITERATION_COUNT
            )));
        }

        let mut derived = Zeroizing::new(vec![0u8; cfg.key_length]);
        openssl::pkcs5::pbkdf2_hmac(
            passphrase.expose_secret().as_bytes(),
            cfg.salt.as_bytes(),
            cfg.iteration_count as usize,
            cfg.hash.digest(),
            &mut derived,
        )?;

        Ok(Self {
            hex: SecretString::from(hex::encode(&*derived)),
            iteration_count: cfg.iteration_count,
        })
    }

    /// The DEK as a text passphrase for PKCS#8 wrapping.
    pub(crate) fn passphrase(&self) -> &str {
        self.hex.expose_secret()
    }

    pub(crate) fn iteration_count(&self) -> u32 {
        self.iteration_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passphrase() -> SecretString {
        SecretString::from("this is not a secure phrase".to_string())
    }

    #[test]
    fn derive_is_deterministic() {
        let cfg = DekConfig::default();
        let a = Dek::derive(&passphrase(), &cfg).unwrap();
        let b = Dek::derive(&passphrase(), &cfg).unwrap();
        assert_eq!(a.passphrase(), b.passphrase());
        assert_eq!(a.passphrase().len(), cfg.key_length * 2);
    }

    #[test]
    fn different_salt_different_key() {
        let cfg_a = DekConfig::default();
        let cfg_b = DekConfig {
            salt: "another salt, same length".to_string(),
            ..DekConfig::default()
        };
        let a = Dek::derive(&passphrase(), &cfg_a).unwrap();
        let b = Dek::derive(&passphrase(), &cfg_b).unwrap();
        assert_ne!(a.passphrase(), b.passphrase());
    }

    #[test]
    fn short_passphrase_rejected() {
        let err = Dek::derive(
            &SecretString::from("too short".to_string()),
            &DekConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, KeychainError::WeakPassphrase { .. }));
    }

    #[test]
    fn floors_rejected() {
        let cases = [
            DekConfig {
                key_length: 13,
                ..DekConfig::default()
            },
            DekConfig {
                salt: "short".to_string(),
                ..DekConfig::default()
            },
            DekConfig {
                iteration_count: 999,
                ..DekConfig::default()
            },
        ];
        for cfg in cases {
            let err = Dek::derive(&passphrase(), &cfg).unwrap_err();
            assert!(matches!(err, KeychainError::InvalidConfig(_)), "{err}");
        }
    }

    #[test]
    fn sha256_profile_supported() {
        let cfg = DekConfig {
            hash: DekHash::Sha256,
            ..DekConfig::default()
        };
        let dek = Dek::derive(&passphrase(), &cfg).unwrap();
        assert_eq!(dek.iteration_count(), 10_000);
        assert!(dek.passphrase().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
