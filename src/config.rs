use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::dek::DekConfig;
use crate::error::{KeychainError, Result};

/// Keychain construction options: the chain passphrase and the PBKDF2
/// profile used to derive the on-disk encryption key from it.
///
/// Field defaults apply per-field, so a config file (or literal) only
/// has to name the values it wants to override.
#[derive(Debug, Deserialize)]
pub struct KeychainConfig {
    pub passphrase: SecretString,
    #[serde(default)]
    pub dek: DekConfig,
}

impl KeychainConfig {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: SecretString::from(passphrase.into()),
            dek: DekConfig::default(),
        }
    }

    pub fn with_dek(mut self, dek: DekConfig) -> Self {
        self.dek = dek;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .map_err(|e| KeychainError::InvalidConfig(format!("failed to read {}: {}", path, e)))?;

        let config: KeychainConfig = toml::from_str(&config_str)
            .map_err(|e| KeychainError::InvalidConfig(format!("failed to parse {}: {}", path, e)))?;

        Ok(config)
    }

    /// Load configuration with default path (keychain.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("keychain.toml")
    }
}
