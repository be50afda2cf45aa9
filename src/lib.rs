//! Secure key chain for a peer-to-peer node.
//!
//! Manages the lifecycle of named RSA identities, persists them
//! encrypted at rest, and offers CMS (PKCS#7 EnvelopedData)
//! encryption keyed by the stored identities.
//!
//! # Overview
//!
//! Every private key lives in a pluggable object store as encrypted
//! PKCS#8 PEM, wrapped under a derived encryption key (DEK): the
//! PBKDF2 output of the chain passphrase. Keys are addressed by name
//! within the chain, and across chains by a stable content address:
//! the base64 SHA-256 of the RSA public key DER. That content
//! address doubles as the `CN` of the self-issued certificate each CMS
//! envelope names as its recipient, which is how an incoming envelope
//! is matched back to a stored key.
//!
//! ```text
//! Keychain ──owns── DEK (PBKDF2 of passphrase, zeroized on drop)
//!     │
//!     ├── Store (object store: filesystem or in-memory)
//!     │       one encrypted PKCS#8 PEM record per key, `/<name>`
//!     │
//!     └── CMS  (EnvelopedData to/from chain keys,
//!               recipient discovery via O=ipfs / CN=<keyId>)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use p2p_keychain::{FsStore, Keychain, KeychainConfig};
//!
//! # async fn example() -> p2p_keychain::Result<()> {
//! let store = FsStore::open("keystore")?;
//! let chain = Keychain::new(
//!     Box::new(store),
//!     KeychainConfig::new("a passphrase of at least twenty characters"),
//! )?;
//!
//! let info = chain.create_key("rsa-key", "rsa", 2048).await?;
//! let envelope = chain
//!     .create_anonymous_encrypted_data("rsa-key", b"hello")
//!     .await?;
//! let plain = chain.read_data(&envelope).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security notes
//!
//! - The DEK never leaves the chain: it is not returned by any public
//!   operation, not logged, and zeroized when the chain is dropped.
//! - The name `self` is reserved for the node identity and cannot be
//!   created, renamed to, imported as, or removed.
//! - Export re-wraps under the caller's password with AES-256 and
//!   PBKDF2-SHA-512; stored records use the same scheme under the DEK.

pub mod cms;
pub mod config;
pub mod dek;
pub mod error;
pub mod fs_store;
pub mod key_codec;
pub mod keychain;
pub mod memory_store;
pub mod store;

pub use config::KeychainConfig;
pub use dek::{DekConfig, DekHash};
pub use error::{KeychainError, Result};
pub use fs_store::FsStore;
pub use keychain::{
    valid_name, CipherBlob, KeyInfo, Keychain, PeerIdentity, PeerKeyCodec, RSA_PKCS1_PADDING,
    SELF_KEY,
};
pub use memory_store::MemStore;
pub use store::{Store, StoreBatch};
