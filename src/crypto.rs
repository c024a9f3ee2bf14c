//! Credential encryption using AES-256-GCM
//!
//! Provider tokens are stored as `version || nonce || ciphertext+tag`. The additional
//! authenticated data binds every ciphertext to `owner|site|provider`, so a row copied onto
//! another connection fails to decrypt.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::cms_connection::Model as CmsConnectionModel;
use crate::providers::{CredentialBundle, ProviderKind};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(ZeroizingKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypts a versioned payload. Anything without the version marker is rejected.
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }
    if !is_encrypted_payload(ciphertext) {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];
    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

/// AAD binding a credential to its connection identity.
pub fn connection_aad(owner_id: Uuid, site_id: Uuid, provider: ProviderKind) -> String {
    format!("{owner_id}|{site_id}|{provider}")
}

/// Encrypted forms of the two token fields of a [`CredentialBundle`].
#[derive(Debug, Clone)]
pub struct EncryptedCredentials {
    pub access_token: Vec<u8>,
    pub refresh_token: Option<Vec<u8>>,
}

pub fn encrypt_credentials(
    key: &CryptoKey,
    aad: &str,
    bundle: &CredentialBundle,
) -> Result<EncryptedCredentials, CryptoError> {
    let access_token = encrypt_bytes(key, aad.as_bytes(), bundle.access_token.as_bytes())?;
    let refresh_token = bundle
        .refresh_token
        .as_deref()
        .map(|token| encrypt_bytes(key, aad.as_bytes(), token.as_bytes()))
        .transpose()?;

    Ok(EncryptedCredentials {
        access_token,
        refresh_token,
    })
}

fn decrypt_string(key: &CryptoKey, aad: &str, ciphertext: &[u8]) -> Result<String, CryptoError> {
    let bytes = decrypt_bytes(key, aad.as_bytes(), ciphertext)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {e}")))
}

/// Rebuilds the plaintext bundle for a stored connection.
pub fn decrypt_connection_credentials(
    key: &CryptoKey,
    connection: &CmsConnectionModel,
) -> Result<CredentialBundle, CryptoError> {
    let provider = connection
        .provider_kind()
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    let aad = connection_aad(connection.owner_id, connection.site_id, provider);

    let access_token = decrypt_string(key, &aad, &connection.access_token_ciphertext)?;
    let refresh_token = connection
        .refresh_token_ciphertext
        .as_deref()
        .map(|ciphertext| decrypt_string(key, &aad, ciphertext))
        .transpose()?;
    let scopes = connection
        .scopes
        .clone()
        .and_then(|value| serde_json::from_value::<Vec<String>>(value).ok())
        .unwrap_or_default();

    Ok(CredentialBundle {
        access_token,
        refresh_token,
        expires_at: connection.expires_at.map(|ts| ts.with_timezone(&chrono::Utc)),
        scopes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    fn stored_connection(key: &CryptoKey, bundle: &CredentialBundle) -> CmsConnectionModel {
        let owner_id = Uuid::new_v4();
        let site_id = Uuid::new_v4();
        let aad = connection_aad(owner_id, site_id, ProviderKind::Webflow);
        let encrypted = encrypt_credentials(key, &aad, bundle).expect("encryption succeeds");
        let now = Utc::now().fixed_offset();

        CmsConnectionModel {
            id: Uuid::new_v4(),
            owner_id,
            site_id,
            provider: "webflow".to_string(),
            display_name: None,
            status: "active".to_string(),
            access_token_ciphertext: encrypted.access_token,
            refresh_token_ciphertext: encrypted.refresh_token,
            expires_at: bundle.expires_at.map(|ts| ts.fixed_offset()),
            scopes: Some(serde_json::json!(bundle.scopes)),
            token_version: 1,
            config: None,
            last_error: None,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let encrypted = encrypt_bytes(&key, b"aad", b"secret message").expect("encryption succeeds");
        let decrypted = decrypt_bytes(&key, b"aad", &encrypted).expect("decryption succeeds");
        assert_eq!(decrypted, b"secret message");
    }

    #[test]
    fn test_different_aad_fails() {
        let key = test_key();
        let encrypted = encrypt_bytes(&key, b"aad-1", b"secret").expect("encryption succeeds");
        assert!(decrypt_bytes(&key, b"aad-2", &encrypted).is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let mut encrypted = encrypt_bytes(&key, b"aad", b"secret").expect("encryption succeeds");
        encrypted[13] ^= 0x01;
        assert!(decrypt_bytes(&key, b"aad", &encrypted).is_err());
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let encrypted1 = encrypt_bytes(&key, b"aad", b"secret").expect("encryption succeeds");
        let encrypted2 = encrypt_bytes(&key, b"aad", b"secret").expect("encryption succeeds");
        assert_ne!(&encrypted1[1..13], &encrypted2[1..13]);
    }

    #[test]
    fn test_plaintext_payloads_are_rejected() {
        let key = test_key();
        assert!(matches!(
            decrypt_bytes(&key, b"aad", b"plain-token"),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[VERSION_ENCRYPTED, 0x02]),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(!is_encrypted_payload(b"legacy"));
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(CryptoKey::new(vec![0u8; 16]).is_err());
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }

    #[test]
    fn test_connection_credentials_roundtrip() {
        let key = test_key();
        let bundle = CredentialBundle {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(Utc::now()),
            scopes: vec!["cms:write".to_string()],
        };
        let connection = stored_connection(&key, &bundle);
        assert!(is_encrypted_payload(&connection.access_token_ciphertext));

        let decrypted = decrypt_connection_credentials(&key, &connection).expect("decrypts");
        assert_eq!(decrypted.access_token, "access");
        assert_eq!(decrypted.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(decrypted.scopes, bundle.scopes);
    }

    #[test]
    fn test_credentials_bound_to_connection_identity() {
        let key = test_key();
        let mut connection = stored_connection(&key, &CredentialBundle::bearer("access"));
        connection.site_id = Uuid::new_v4();
        assert!(decrypt_connection_credentials(&key, &connection).is_err());
    }
}
