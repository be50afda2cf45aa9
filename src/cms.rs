//! CMS (PKCS#7) enveloped-message encryption keyed by chain identities.
//!
//! An envelope is RFC 5652 EnvelopedData DER with a single
//! KeyTransRecipientInfo whose issuer Name carries `O=ipfs` and
//! `CN=<keyId>`, the recipient-discovery contract. Building and
//! decrypting go through openssl; recipient enumeration parses the DER
//! directly, since the openssl binding exposes no recipient infos. All
//! operations are stateless transformations.

use cms::content_info::ContentInfo;
use cms::enveloped_data::{EnvelopedData, RecipientIdentifier, RecipientInfo};
use der::asn1::ObjectIdentifier;
use der::{Decode, Encode, Tag, Tagged};
use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::stack::Stack;
use openssl::symm::Cipher;

use crate::error::{KeychainError, Result};
use crate::key_codec::{self, CERT_ORGANIZATION};
use crate::keychain::Keychain;

const OID_ENVELOPED_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.3");
const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");

impl Keychain {
    /// Encrypt `plain` into a PKCS#7 EnvelopedData addressed to the
    /// named chain key.
    ///
    /// "Anonymous" because the envelope carries no sender signature;
    /// the recipient is identified only by the issuer attributes of the
    /// self-issued certificate.
    pub async fn create_anonymous_encrypted_data(
        &self,
        name: &str,
        plain: &[u8],
    ) -> Result<Vec<u8>> {
        self.check_name(name)?;
        let pkey = self.unwrap_named_key(name).await?;
        let cert = key_codec::certificate_for_key(&pkey)?;

        let mut recipients = Stack::new()?;
        recipients.push(cert)?;

        let envelope = CmsContentInfo::encrypt(
            &recipients,
            plain,
            Cipher::aes_256_cbc(),
            CMSOptions::BINARY,
        )?;
        Ok(envelope.to_der()?)
    }

    /// Decrypt an EnvelopedData produced for one of this chain's keys.
    ///
    /// Recipients are filtered to issuers carrying both `O=ipfs` and a
    /// `CN`; the CN value is the content-addressed key id. The first
    /// candidate resolving to a stored key is used; when none does the
    /// envelope is not for this chain and `NoDecryptionKey` is
    /// returned.
    pub async fn read_data(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        let candidates = recipient_key_ids(envelope)?;

        let mut chosen = None;
        for id in &candidates {
            if let Some(info) = self.find_key_by_id(id).await? {
                chosen = Some(info);
                break;
            }
        }
        let info = chosen.ok_or(KeychainError::NoDecryptionKey)?;

        let pkey = self.unwrap_named_key(&info.name).await?;
        let content = CmsContentInfo::from_der(envelope)
            .map_err(|e| KeychainError::InvalidCms(format!("EnvelopedData parse failed: {e}")))?;
        content
            .decrypt_without_cert_check(&pkey)
            .map_err(|e| KeychainError::CryptoFailure(format!("CMS decryption failed: {e}")))
    }
}

/// Key ids named by an envelope's KeyTransRecipientInfo entries whose
/// issuer matches the discovery contract.
fn recipient_key_ids(envelope: &[u8]) -> Result<Vec<String>> {
    let content_info = ContentInfo::from_der(envelope)
        .map_err(|e| KeychainError::InvalidCms(format!("not a CMS ContentInfo: {e}")))?;
    if content_info.content_type != OID_ENVELOPED_DATA {
        return Err(KeychainError::InvalidCms(format!(
            "unexpected content type {}",
            content_info.content_type
        )));
    }

    let content = content_info
        .content
        .to_der()
        .map_err(|e| KeychainError::InvalidCms(e.to_string()))?;
    let enveloped = EnvelopedData::from_der(&content)
        .map_err(|e| KeychainError::InvalidCms(format!("malformed EnvelopedData: {e}")))?;

    let mut ids = Vec::new();
    for recipient in enveloped.recip_infos.0.iter() {
        let RecipientInfo::Ktri(ktri) = recipient else {
            continue;
        };
        let RecipientIdentifier::IssuerAndSerialNumber(ias) = &ktri.rid else {
            continue;
        };

        let mut organization = None;
        let mut common_name = None;
        for rdn in ias.issuer.0.iter() {
            for atv in rdn.0.iter() {
                if atv.oid == OID_ORGANIZATION {
                    organization = directory_string(&atv.value);
                } else if atv.oid == OID_COMMON_NAME {
                    common_name = directory_string(&atv.value);
                }
            }
        }

        if organization.as_deref() == Some(CERT_ORGANIZATION) {
            if let Some(id) = common_name {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

fn directory_string(value: &der::Any) -> Option<String> {
    match value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String | Tag::TeletexString => {
            std::str::from_utf8(value.value()).ok().map(str::to_owned)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemStore;

    fn chain() -> Keychain {
        Keychain::with_passphrase(Box::new(MemStore::new()), "this is not a secure phrase")
            .unwrap()
    }

    #[tokio::test]
    async fn envelope_names_the_recipient_key_id() {
        let chain = chain();
        let info = chain.create_key("cms-key", "rsa", 2048).await.unwrap();
        let envelope = chain
            .create_anonymous_encrypted_data("cms-key", b"hello")
            .await
            .unwrap();

        let ids = recipient_key_ids(&envelope).unwrap();
        assert_eq!(ids, vec![info.id]);
    }

    #[tokio::test]
    async fn garbage_is_invalid_cms() {
        let chain = chain();
        assert!(matches!(
            chain.read_data(b"not an envelope").await.unwrap_err(),
            KeychainError::InvalidCms(_)
        ));
        assert!(matches!(
            chain.read_data(&[]).await.unwrap_err(),
            KeychainError::InvalidCms(_)
        ));
    }

    #[tokio::test]
    async fn round_trip_through_own_key() {
        let chain = chain();
        chain.create_key("cms-key", "rsa", 2048).await.unwrap();
        let plain = b"This is a message from Alice to Bob";
        let envelope = chain
            .create_anonymous_encrypted_data("cms-key", plain)
            .await
            .unwrap();
        assert_eq!(chain.read_data(&envelope).await.unwrap(), plain);
    }
}
