//! The key chain facade.
//!
//! Owns the derived encryption key and the backing store, and enforces
//! every naming and lifecycle invariant. All stored records are
//! encrypted PKCS#8 PEM wrapped under the DEK; plaintext key material
//! only exists in memory between a store read and the operation that
//! needed it.

use openssl::pkey::{PKey, Private};
use openssl::rsa::Padding;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::config::KeychainConfig;
use crate::dek::Dek;
use crate::error::{KeychainError, Result};
use crate::key_codec;
use crate::store::{ds_key, name_of, Store};

/// Reserved key name: the node's own identity slot. It can be read and
/// used but never created, renamed to, imported as, or removed through
/// the chain.
pub const SELF_KEY: &str = "self";

/// Algorithm tag on [`CipherBlob`] values.
pub const RSA_PKCS1_PADDING: &str = "RSA_PKCS1_PADDING";

const MIN_RSA_BITS: u32 = 2048;

/// Public view of a stored key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub name: String,
    /// Content address: base64 SHA-256 of the RSA public key DER, or a
    /// peer-supplied id string for imported peer identities.
    pub id: String,
    /// Physical record path, when the store reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Result of the low-level RSA encrypt primitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherBlob {
    pub algorithm: String,
    pub cipher_data: Vec<u8>,
}

/// A foreign peer identity whose private key can be absorbed into the
/// chain.
pub trait PeerIdentity {
    /// The peer's marshalled private-key envelope, when it carries one.
    fn marshalled_private_key(&self) -> Option<&[u8]>;

    /// The peer's native id string (e.g. a base58 multihash), when it
    /// has one. Recorded as the key id so later lookups by that string
    /// succeed.
    fn id_string(&self) -> Option<String>;
}

/// Decodes a peer's marshalled private-key envelope into a raw DER
/// private key. Supplied by the peer-identity layer, not this crate.
pub trait PeerKeyCodec {
    fn decode_private_key(&self, blob: &[u8]) -> Result<Vec<u8>>;
}

/// A valid key name equals its trimmed form, is non-empty, and contains
/// no path separators, traversal sequences, control characters, or
/// filesystem-reserved punctuation.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name == name.trim()
        && !name.contains("..")
        && name.chars().all(|c| {
            !c.is_control() && !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
        })
}

/// Manages named RSA identities encrypted at rest.
pub struct Keychain {
    store: Box<dyn Store>,
    dek: Dek,
    /// Peer-supplied id strings by key name. A key record holds only the
    /// wrapped PEM, so a foreign id (e.g. a multihash) cannot be
    /// recomputed from it; imports record it here so id lookups keep
    /// resolving for the life of the chain.
    peer_ids: RwLock<HashMap<String, String>>,
}

impl Keychain {
    /// Build a chain over `store`. Derives the DEK from the configured
    /// passphrase; fails with `WeakPassphrase`/`InvalidConfig` when the
    /// passphrase or PBKDF2 profile is below the required floors.
    pub fn new(store: Box<dyn Store>, config: KeychainConfig) -> Result<Self> {
        let dek = Dek::derive(&config.passphrase, &config.dek)?;
        Ok(Self {
            store,
            dek,
            peer_ids: RwLock::new(HashMap::new()),
        })
    }

    /// Convenience constructor with the default DEK profile.
    pub fn with_passphrase(store: Box<dyn Store>, passphrase: impl Into<String>) -> Result<Self> {
        Self::new(
            store,
            KeychainConfig {
                passphrase: SecretString::from(passphrase.into()),
                dek: Default::default(),
            },
        )
    }

    /// Generate and store a new named RSA key.
    ///
    /// Existence is checked against the store before the write. On a
    /// store without conditional writes, two concurrent creates for
    /// the same name can interleave between the check and the put;
    /// the store's last write wins.
    ///
    /// # Errors
    ///
    /// `InvalidName`, `InvalidKeyType`, `InvalidKeySize`,
    /// `DuplicateKey`, `KeyGenFailed`, `StoreIo`.
    pub async fn create_key(&self, name: &str, key_type: &str, size: u32) -> Result<KeyInfo> {
        self.check_mutable_name(name)?;
        if !key_type.eq_ignore_ascii_case("rsa") {
            return Err(KeychainError::InvalidKeyType(key_type.to_string()));
        }
        if size < MIN_RSA_BITS {
            return Err(KeychainError::InvalidKeySize(size));
        }
        if self.store.has(&ds_key(name)).await? {
            return Err(KeychainError::DuplicateKey(name.to_string()));
        }

        let pkey = tokio::task::spawn_blocking(move || key_codec::generate_rsa(size))
            .await
            .map_err(|e| KeychainError::KeyGenFailed(e.to_string()))??;

        let info = self.store_new_key(name, &pkey, None).await?;
        tracing::debug!(name, id = %info.id, "created key");
        Ok(info)
    }

    /// All stored keys. Ordering is unspecified.
    pub async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        let mut infos = Vec::new();
        for key in self.store.query_keys().await? {
            infos.push(self.info_for(name_of(&key)).await?);
        }
        Ok(infos)
    }

    /// Locate a key by its content-addressed id. Accepts both the local
    /// base64 form and peer-supplied id strings. Absent is `None`, not
    /// an error. Linear in the number of stored keys.
    pub async fn find_key_by_id(&self, id: &str) -> Result<Option<KeyInfo>> {
        for key in self.store.query_keys().await? {
            let info = self.info_for(name_of(&key)).await?;
            if info.id == id {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    /// Locate a key by name; `KeyNotFound` when absent.
    pub async fn find_key_by_name(&self, name: &str) -> Result<KeyInfo> {
        self.check_name(name)?;
        self.info_for(name).await
    }

    /// Delete a stored key.
    pub async fn remove_key(&self, name: &str) -> Result<()> {
        self.check_mutable_name(name)?;
        if !self.store.has(&ds_key(name)).await? {
            return Err(KeychainError::KeyNotFound(name.to_string()));
        }
        self.store.delete(&ds_key(name)).await?;
        self.peer_ids.write().await.remove(name);
        tracing::debug!(name, "removed key");
        Ok(())
    }

    /// Rename a stored key, preserving its material and id.
    ///
    /// Commits through the store's batch when one is available;
    /// otherwise writes the new record before deleting the old one, so
    /// a failure between the two steps leaves both names present.
    pub async fn rename_key(&self, old: &str, new: &str) -> Result<KeyInfo> {
        self.check_mutable_name(old)?;
        self.check_mutable_name(new)?;

        let pem = self.wrapped_pem(old).await?;
        if self.store.has(&ds_key(new)).await? {
            return Err(KeychainError::DuplicateKey(new.to_string()));
        }

        match self.store.batch() {
            Some(mut batch) => {
                batch.put(&ds_key(new), pem.clone().into_bytes());
                batch.delete(&ds_key(old));
                batch.commit().await?;
            }
            None => {
                self.store.put(&ds_key(new), pem.as_bytes()).await?;
                self.store.delete(&ds_key(old)).await?;
            }
        }

        let mut peer_ids = self.peer_ids.write().await;
        if let Some(id) = peer_ids.remove(old) {
            peer_ids.insert(new.to_string(), id);
        }
        drop(peer_ids);

        tracing::debug!(old, new, "renamed key");
        self.info_for(new).await
    }

    /// Export a key as encrypted PKCS#8 PEM under `password`.
    ///
    /// AES-256 with PBKDF2-SHA-512, the chain's DEK iteration count,
    /// and a fresh random salt.
    pub async fn export_key(&self, name: &str, password: &str) -> Result<String> {
        self.check_name(name)?;
        let pkey = self.unwrap_named_key(name).await?;
        key_codec::wrap_key(&pkey, password, self.dek.iteration_count())
    }

    /// Import an encrypted PKCS#8 PEM under a new name.
    ///
    /// The PEM is decrypted under `password` (failure is
    /// `WrongPassword`) and re-wrapped under the chain's DEK.
    pub async fn import_key(&self, name: &str, pem: &str, password: &str) -> Result<KeyInfo> {
        self.check_mutable_name(name)?;
        if pem.is_empty() {
            return Err(KeychainError::InvalidArgument(
                "missing PEM to import".to_string(),
            ));
        }
        if self.store.has(&ds_key(name)).await? {
            return Err(KeychainError::DuplicateKey(name.to_string()));
        }

        let pkey = key_codec::unwrap_key(pem, password)
            .map_err(|_| KeychainError::WrongPassword(name.to_string()))?;

        let info = self.store_new_key(name, &pkey, None).await?;
        tracing::debug!(name, id = %info.id, "imported key");
        Ok(info)
    }

    /// Absorb a foreign peer identity's private key under a new name.
    ///
    /// `codec` unmarshals the peer's envelope to raw DER. The recorded
    /// id is the peer's native id string when it supplies one, else the
    /// local content address.
    pub async fn import_peer(
        &self,
        name: &str,
        peer: &dyn PeerIdentity,
        codec: &dyn PeerKeyCodec,
    ) -> Result<KeyInfo> {
        self.check_mutable_name(name)?;
        if self.store.has(&ds_key(name)).await? {
            return Err(KeychainError::DuplicateKey(name.to_string()));
        }

        let blob = peer.marshalled_private_key().ok_or_else(|| {
            KeychainError::InvalidArgument("peer identity carries no private key".to_string())
        })?;
        let der = codec.decode_private_key(blob)?;
        let pkey = key_codec::private_key_from_der(&der)?;

        let info = self.store_new_key(name, &pkey, peer.id_string()).await?;
        if peer.id_string().is_some() {
            self.peer_ids
                .write()
                .await
                .insert(name.to_string(), info.id.clone());
        }
        tracing::debug!(name, id = %info.id, "imported peer key");
        Ok(info)
    }

    /// Low-level RSA-PKCS#1 v1.5 encryption with the named key.
    pub async fn encrypt(&self, name: &str, plain: &[u8]) -> Result<CipherBlob> {
        self.check_name(name)?;
        let pkey = self.unwrap_named_key(name).await?;
        let rsa = pkey.rsa()?;

        let limit = rsa.size() as usize - 11;
        if plain.len() > limit {
            return Err(KeychainError::InvalidArgument(format!(
                "plaintext is {} bytes, RSA-PKCS1 limit for key '{}' is {}",
                plain.len(),
                name,
                limit
            )));
        }

        let mut cipher_data = vec![0u8; rsa.size() as usize];
        let written = rsa.public_encrypt(plain, &mut cipher_data, Padding::PKCS1)?;
        cipher_data.truncate(written);

        Ok(CipherBlob {
            algorithm: RSA_PKCS1_PADDING.to_string(),
            cipher_data,
        })
    }

    /// Inverse of [`Keychain::encrypt`].
    pub async fn decrypt(&self, name: &str, cipher: &[u8]) -> Result<Vec<u8>> {
        self.check_name(name)?;
        let pkey = self.unwrap_named_key(name).await?;
        let rsa = pkey.rsa()?;

        let mut plain = vec![0u8; rsa.size() as usize];
        let written = rsa
            .private_decrypt(cipher, &mut plain, Padding::PKCS1)
            .map_err(|e| {
                KeychainError::CryptoFailure(format!("RSA decryption with '{name}' failed: {e}"))
            })?;
        plain.truncate(written);
        Ok(plain)
    }

    pub(crate) fn check_name(&self, name: &str) -> Result<()> {
        if !valid_name(name) {
            return Err(KeychainError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    fn check_mutable_name(&self, name: &str) -> Result<()> {
        self.check_name(name)?;
        if name == SELF_KEY {
            return Err(KeychainError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    async fn wrapped_pem(&self, name: &str) -> Result<String> {
        let bytes = self.store.get(&ds_key(name)).await?;
        String::from_utf8(bytes).map_err(|_| {
            KeychainError::CryptoFailure(format!("key record for '{name}' is not PEM text"))
        })
    }

    /// Read and unwrap a stored key. Decryption happens in-process,
    /// with no suspension between the store read and the unwrap.
    pub(crate) async fn unwrap_named_key(&self, name: &str) -> Result<PKey<Private>> {
        let pem = self.wrapped_pem(name).await?;
        key_codec::unwrap_key(&pem, self.dek.passphrase())
    }

    async fn store_new_key(
        &self,
        name: &str,
        pkey: &PKey<Private>,
        peer_id: Option<String>,
    ) -> Result<KeyInfo> {
        let pem = key_codec::wrap_key(pkey, self.dek.passphrase(), self.dek.iteration_count())?;
        self.store.put(&ds_key(name), pem.as_bytes()).await?;

        let id = match peer_id {
            Some(id) => id,
            None => key_codec::key_id(pkey)?,
        };
        Ok(KeyInfo {
            name: name.to_string(),
            id,
            path: self.record_path(name),
        })
    }

    async fn info_for(&self, name: &str) -> Result<KeyInfo> {
        let pkey = self.unwrap_named_key(name).await?;
        let id = match self.peer_ids.read().await.get(name) {
            Some(peer_id) => peer_id.clone(),
            None => key_codec::key_id(&pkey)?,
        };
        Ok(KeyInfo {
            name: name.to_string(),
            id,
            path: self.record_path(name),
        })
    }

    fn record_path(&self, name: &str) -> Option<String> {
        self.store
            .resolve_path(&ds_key(name))
            .map(|p| p.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemStore;

    fn chain() -> Keychain {
        Keychain::with_passphrase(
            Box::new(MemStore::new()),
            "this is not a secure phrase",
        )
        .unwrap()
    }

    #[test]
    fn name_validation_table() {
        for good in ["rsa-key", "a", "key with spaces", "self", "dotted.name"] {
            assert!(valid_name(good), "{good:?} should be valid");
        }
        for bad in ["", "   ", " padded ", "../x", "a/b", "a\\b", "nul\0", "a:b"] {
            assert!(!valid_name(bad), "{bad:?} should be invalid");
        }
    }

    #[tokio::test]
    async fn create_rejects_bad_inputs() {
        let chain = chain();
        assert!(matches!(
            chain.create_key("self", "rsa", 2048).await.unwrap_err(),
            KeychainError::InvalidName(_)
        ));
        assert!(matches!(
            chain.create_key("../x", "rsa", 2048).await.unwrap_err(),
            KeychainError::InvalidName(_)
        ));
        assert!(matches!(
            chain.create_key("k", "ed25519", 2048).await.unwrap_err(),
            KeychainError::InvalidKeyType(_)
        ));
        let err = chain.create_key("k", "rsa", 1024).await.unwrap_err();
        assert!(matches!(err, KeychainError::InvalidKeySize(1024)));
        assert!(err.to_string().contains("1024"));
    }

    #[tokio::test]
    async fn key_type_is_case_insensitive() {
        let chain = chain();
        let info = chain.create_key("upper", "RSA", 2048).await.unwrap();
        assert_eq!(info.name, "upper");
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let chain = chain();
        chain.create_key("dup", "rsa", 2048).await.unwrap();
        assert!(matches!(
            chain.create_key("dup", "rsa", 2048).await.unwrap_err(),
            KeychainError::DuplicateKey(name) if name == "dup"
        ));
    }

    #[tokio::test]
    async fn remove_missing_key_fails() {
        let chain = chain();
        assert!(matches!(
            chain.remove_key("not-there").await.unwrap_err(),
            KeychainError::KeyNotFound(_)
        ));
        assert!(matches!(
            chain.remove_key("self").await.unwrap_err(),
            KeychainError::InvalidName(_)
        ));
    }

    #[tokio::test]
    async fn rename_rejects_self_and_collisions() {
        let chain = chain();
        chain.create_key("a", "rsa", 2048).await.unwrap();
        chain.create_key("b", "rsa", 2048).await.unwrap();
        assert!(matches!(
            chain.rename_key("a", "self").await.unwrap_err(),
            KeychainError::InvalidName(_)
        ));
        assert!(matches!(
            chain.rename_key("a", "b").await.unwrap_err(),
            KeychainError::DuplicateKey(_)
        ));
        assert!(matches!(
            chain.rename_key("ghost", "c").await.unwrap_err(),
            KeychainError::KeyNotFound(_)
        ));
    }

    #[tokio::test]
    async fn import_rejects_wrong_password_and_empty_pem() {
        let chain = chain();
        chain.create_key("orig", "rsa", 2048).await.unwrap();
        let pem = chain.export_key("orig", "export pw").await.unwrap();

        assert!(matches!(
            chain.import_key("copy", &pem, "bad pw").await.unwrap_err(),
            KeychainError::WrongPassword(name) if name == "copy"
        ));
        assert!(matches!(
            chain.import_key("copy", "", "pw").await.unwrap_err(),
            KeychainError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn oversized_plaintext_is_invalid_argument() {
        let chain = chain();
        chain.create_key("enc", "rsa", 2048).await.unwrap();
        let too_big = vec![0u8; 2048 / 8];
        assert!(matches!(
            chain.encrypt("enc", &too_big).await.unwrap_err(),
            KeychainError::InvalidArgument(_)
        ));
    }

    struct TestPeer {
        blob: Option<Vec<u8>>,
        id: Option<String>,
    }

    impl PeerIdentity for TestPeer {
        fn marshalled_private_key(&self) -> Option<&[u8]> {
            self.blob.as_deref()
        }
        fn id_string(&self) -> Option<String> {
            self.id.clone()
        }
    }

    /// Peer envelopes in tests are already raw DER.
    struct RawDerCodec;

    impl PeerKeyCodec for RawDerCodec {
        fn decode_private_key(&self, blob: &[u8]) -> crate::error::Result<Vec<u8>> {
            Ok(blob.to_vec())
        }
    }

    #[tokio::test]
    async fn import_peer_records_native_id() {
        let chain = chain();
        let pkey = crate::key_codec::generate_rsa(2048).unwrap();
        let peer = TestPeer {
            blob: Some(pkey.private_key_to_pkcs8().unwrap()),
            id: Some("QmPeerNativeId".to_string()),
        };

        let info = chain.import_peer("peer", &peer, &RawDerCodec).await.unwrap();
        assert_eq!(info.id, "QmPeerNativeId");

        // the native id keeps resolving, including across a rename
        let found = chain.find_key_by_id("QmPeerNativeId").await.unwrap().unwrap();
        assert_eq!(found.name, "peer");
        chain.rename_key("peer", "peer-2").await.unwrap();
        let found = chain.find_key_by_id("QmPeerNativeId").await.unwrap().unwrap();
        assert_eq!(found.name, "peer-2");
    }

    #[tokio::test]
    async fn import_peer_without_key_fails() {
        let chain = chain();
        let peer = TestPeer { blob: None, id: None };
        assert!(matches!(
            chain.import_peer("peer", &peer, &RawDerCodec).await.unwrap_err(),
            KeychainError::InvalidArgument(_)
        ));
    }
}
