//! AES-256-GCM cipher for secret attribute values at rest.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use provisio_application::SecretCipher;
use provisio_core::{AppError, AppResult};

const NONCE_LENGTH: usize = 12;

/// AES-256-GCM cipher producing base64 text of nonce and ciphertext.
#[derive(Clone)]
pub struct AesSecretCipher {
    cipher: Aes256Gcm,
}

impl AesSecretCipher {
    /// Creates a cipher from a 32-byte key.
    #[must_use]
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(key_bytes.into());
        Self { cipher }
    }

    /// Creates a cipher from a hex-encoded 32-byte key.
    pub fn from_hex(hex_key: &str) -> AppResult<Self> {
        let decoded = hex::decode(hex_key.trim()).map_err(|error| {
            AppError::Validation(format!("invalid PROVISIO_SECRET_KEY hex: {error}"))
        })?;

        let key: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            AppError::Validation(
                "PROVISIO_SECRET_KEY must be exactly 32 bytes (64 hex chars)".to_owned(),
            )
        })?;
        Ok(Self::new(&key))
    }
}

impl SecretCipher for AesSecretCipher {
    fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|error| AppError::Internal(format!("failed to encrypt secret: {error}")))?;

        let mut sealed = Vec::with_capacity(nonce.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> AppResult<String> {
        let sealed = STANDARD.decode(ciphertext).map_err(|error| {
            AppError::Validation(format!("secret is not valid base64: {error}"))
        })?;
        if sealed.len() < NONCE_LENGTH {
            return Err(AppError::Validation(
                "ciphertext too short: missing nonce".to_owned(),
            ));
        }

        let (nonce_bytes, encrypted) = sealed.split_at(NONCE_LENGTH);
        let nonce_array: [u8; NONCE_LENGTH] = nonce_bytes
            .try_into()
            .map_err(|_| AppError::Internal("nonce must be exactly 12 bytes".to_owned()))?;
        let nonce = Nonce::from(nonce_array);

        let plaintext = self
            .cipher
            .decrypt(&nonce, encrypted)
            .map_err(|error| AppError::Internal(format!("failed to decrypt secret: {error}")))?;
        String::from_utf8(plaintext)
            .map_err(|error| AppError::Internal(format!("decrypted secret is not UTF-8: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_secrets_decrypt_to_the_plaintext() -> AppResult<()> {
        let cipher = AesSecretCipher::new(&[42u8; 32]);

        let encrypted = cipher.encrypt("hunter2")?;

        assert_ne!(encrypted, "hunter2");
        assert_eq!(cipher.decrypt(&encrypted)?, "hunter2");
        Ok(())
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() -> AppResult<()> {
        let cipher = AesSecretCipher::new(&[7u8; 32]);
        assert_ne!(cipher.encrypt("same")?, cipher.encrypt("same")?);
        Ok(())
    }

    #[test]
    fn decrypt_with_wrong_key_fails() -> AppResult<()> {
        let encrypted = AesSecretCipher::new(&[42u8; 32]).encrypt("secret")?;
        assert!(AesSecretCipher::new(&[99u8; 32]).decrypt(&encrypted).is_err());
        Ok(())
    }

    #[test]
    fn hex_keys_must_be_32_bytes() {
        assert!(AesSecretCipher::from_hex(&"ab".repeat(32)).is_ok());
        assert!(matches!(
            AesSecretCipher::from_hex("abcd"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            AesSecretCipher::from_hex("not-hex"),
            Err(AppError::Validation(_))
        ));
    }
}
