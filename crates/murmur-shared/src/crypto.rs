use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{CHANNEL_KEY_SIZE, NONCE_SIZE};
use crate::error::CryptoError;

/// Symmetric key shared by every member of one channel.
///
/// The raw bytes never leave this type except through [`ChannelKey::export`],
/// which is how a key is sealed for a joining member.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelKey([u8; CHANNEL_KEY_SIZE]);

impl ChannelKey {
    pub fn generate() -> Self {
        let mut key = [0u8; CHANNEL_KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; CHANNEL_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw-bytes encoding used for distribution and local storage.
    pub fn export(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn import(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("channel key is not base64: {e}")))?;
        let key: [u8; CHANNEL_KEY_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            CryptoError::InvalidKey(format!(
                "channel key must be {CHANNEL_KEY_SIZE} bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(key))
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelKey(..)")
    }
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &ChannelKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new((&key.0).into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &ChannelKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new((&key.0).into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt a message body for the wire: `base64(nonce || ciphertext)`.
pub fn encrypt_text(key: &ChannelKey, plaintext: &str) -> Result<String, CryptoError> {
    encrypt(key, plaintext.as_bytes()).map(|sealed| BASE64.encode(sealed))
}

pub fn decrypt_text(key: &ChannelKey, encoded: &str) -> Result<String, CryptoError> {
    let data = BASE64
        .decode(encoded.trim())
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let plaintext = decrypt(key, &data)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = ChannelKey::generate();
        let plaintext = b"murmur, murmur";

        let encrypted = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = ChannelKey::generate();
        let key2 = ChannelKey::generate();

        let encrypted = encrypt_text(&key1, "Secret message").unwrap();
        assert_eq!(
            decrypt_text(&key2, &encrypted),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = ChannelKey::generate();

        let mut encrypted = encrypt(&key, b"Important data").unwrap();
        let len = encrypted.len();
        encrypted[len - 1] ^= 0xFF;

        assert!(decrypt(&key, &encrypted).is_err());
    }

    #[test]
    fn test_truncated_input_fails() {
        let key = ChannelKey::generate();
        assert!(decrypt(&key, &[]).is_err());

        let encrypted = encrypt_text(&key, "hello").unwrap();
        let truncated = &encrypted[..12];
        assert_eq!(
            decrypt_text(&key, truncated),
            Err(CryptoError::DecryptionFailed)
        );
        assert!(decrypt_text(&key, "not base64 at all!").is_err());
    }

    #[test]
    fn test_empty_and_unicode_roundtrip() {
        let key = ChannelKey::generate();
        for text in ["", "héllo wörld", "日本語のメッセージ", "emoji 🎉🔥"] {
            let sealed = encrypt_text(&key, text).unwrap();
            assert_eq!(decrypt_text(&key, &sealed).unwrap(), text);
        }
    }

    #[test]
    fn test_identical_plaintexts_differ() {
        let key = ChannelKey::generate();
        let a = encrypt_text(&key, "same").unwrap();
        let b = encrypt_text(&key, "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_nonce_prepended() {
        let key = ChannelKey::generate();
        let encrypted = encrypt(&key, b"test").unwrap();
        // nonce (24) + ciphertext (4 + 16 tag)
        assert_eq!(encrypted.len(), NONCE_SIZE + 4 + 16);
    }

    #[test]
    fn test_key_export_import() {
        let key = ChannelKey::generate();
        let restored = ChannelKey::import(&key.export()).unwrap();
        assert_eq!(key, restored);

        assert!(matches!(
            ChannelKey::import("c2hvcnQ="),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(ChannelKey::import("%%%").is_err());
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let key = ChannelKey::from_bytes([7u8; CHANNEL_KEY_SIZE]);
        assert_eq!(format!("{key:?}"), "ChannelKey(..)");
    }

    proptest! {
        #[test]
        fn prop_text_roundtrip(text in ".*") {
            let key = ChannelKey::generate();
            let sealed = encrypt_text(&key, &text).unwrap();
            prop_assert_eq!(decrypt_text(&key, &sealed).unwrap(), text);
        }
    }
}
