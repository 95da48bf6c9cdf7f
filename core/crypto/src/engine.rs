//! Single entry point bundling the primitives the services depend on.

use crate::aead;
use crate::kdf::{self, KdfParams};
use crate::keys::ItemKey;
use strongroom_common::Result;

/// Password hashing, key generation and AEAD behind one configured value.
///
/// Constructed once at start-up from explicit parameters and shared by the
/// auth and vault services.
#[derive(Debug, Clone, Default)]
pub struct CryptoEngine {
    kdf_params: KdfParams,
}

impl CryptoEngine {
    /// Create an engine hashing passwords with `kdf_params`.
    pub fn new(kdf_params: KdfParams) -> Self {
        Self { kdf_params }
    }

    /// Parameters applied to new password hashes.
    pub fn kdf_params(&self) -> &KdfParams {
        &self.kdf_params
    }

    /// Hash a password with a fresh salt.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        kdf::hash_password(password, &self.kdf_params)
    }

    /// Verify a password against an encoded hash. Never errors.
    pub fn verify_password(&self, password: &str, encoded: &str) -> bool {
        kdf::verify_password(password, encoded)
    }

    /// Generate a fresh 256-bit item key.
    pub fn generate_key(&self) -> ItemKey {
        ItemKey::generate()
    }

    /// Encrypt `plaintext` under `key`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8], key: &ItemKey) -> Result<Vec<u8>> {
        aead::encrypt(key.as_bytes(), plaintext)
    }

    /// Decrypt output of [`CryptoEngine::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8], key: &ItemKey) -> Result<Vec<u8>> {
        aead::decrypt(key.as_bytes(), ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongroom_common::Error;

    #[test]
    fn test_engine_roundtrip() {
        let engine = CryptoEngine::new(KdfParams::insecure_fast());
        let key = engine.generate_key();
        let payload = br#"{"u":"a","p":"b"}"#;

        let sealed = engine.encrypt(payload, &key).unwrap();
        assert_eq!(engine.decrypt(&sealed, &key).unwrap(), payload);
    }

    #[test]
    fn test_engine_wrong_key_fails() {
        let engine = CryptoEngine::default();
        let sealed = engine.encrypt(b"secret", &engine.generate_key()).unwrap();

        assert!(matches!(
            engine.decrypt(&sealed, &engine.generate_key()),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_engine_password_cycle() {
        let engine = CryptoEngine::new(KdfParams::insecure_fast());
        let encoded = engine.hash_password("password123").unwrap();

        assert!(engine.verify_password("password123", &encoded));
        assert!(!engine.verify_password("password124", &encoded));
    }
}
