use base64::{Engine, engine::general_purpose::URL_SAFE};
use ring::{
    aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey},
    rand::{SecureRandom, SystemRandom},
};
use thiserror::Error;

const VERSION: &str = "v1";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("TOKEN_ENC_KEY_B64 is not configured")]
    MissingKey,
    #[error("TOKEN_ENC_KEY_B64 must decode to 32 bytes")]
    InvalidKey,
    #[error("invalid encrypted payload: {0}")]
    Malformed(&'static str),
    #[error("unsupported encrypted payload version: {0}")]
    UnsupportedVersion(String),
    #[error("cipher operation failed")]
    Cipher,
}

/// Opaque encrypt/decrypt capability for OAuth tokens at rest.
pub trait TokenCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;
    fn decrypt(&self, payload: &str) -> Result<String, CryptoError>;
}

/// AES-256-GCM with a random 96-bit nonce, encoded as `v1:<b64url(nonce|ciphertext)>`.
pub struct AesGcmCipher {
    key: Result<LessSafeKey, CryptoError>,
    rng: SystemRandom,
}

impl AesGcmCipher {
    pub fn from_env() -> Self {
        let raw = std::env::var("TOKEN_ENC_KEY_B64").unwrap_or_default();
        Self::from_key_b64(&raw)
    }

    /// Key problems surface on first use rather than at construction.
    pub fn from_key_b64(raw: &str) -> Self {
        Self {
            key: load_key(raw.trim()),
            rng: SystemRandom::new(),
        }
    }

    fn key(&self) -> Result<&LessSafeKey, CryptoError> {
        self.key.as_ref().map_err(Clone::clone)
    }
}

fn load_key(raw: &str) -> Result<LessSafeKey, CryptoError> {
    if raw.is_empty() {
        return Err(CryptoError::MissingKey);
    }
    let bytes = URL_SAFE.decode(raw).map_err(|_| CryptoError::InvalidKey)?;
    let unbound = UnboundKey::new(&AES_256_GCM, &bytes).map_err(|_| CryptoError::InvalidKey)?;
    Ok(LessSafeKey::new(unbound))
}

impl TokenCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let key = self.key()?;
        let mut nonce = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce).map_err(|_| CryptoError::Cipher)?;
        let mut sealed = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::empty(),
            &mut sealed,
        )
        .map_err(|_| CryptoError::Cipher)?;
        let mut raw = Vec::with_capacity(NONCE_LEN + sealed.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&sealed);
        Ok(format!("{VERSION}:{}", URL_SAFE.encode(raw)))
    }

    fn decrypt(&self, payload: &str) -> Result<String, CryptoError> {
        let key = self.key()?;
        let (version, encoded) = payload
            .split_once(':')
            .ok_or(CryptoError::Malformed("missing version prefix"))?;
        let mut raw = URL_SAFE
            .decode(encoded)
            .map_err(|_| CryptoError::Malformed("invalid base64"))?;
        if raw.len() < NONCE_LEN {
            return Err(CryptoError::Malformed("payload too short"));
        }
        if version != VERSION {
            return Err(CryptoError::UnsupportedVersion(version.to_string()));
        }
        let mut body = raw.split_off(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(&raw).map_err(|_| CryptoError::Malformed("nonce"))?;
        let plain = key
            .open_in_place(nonce, Aad::empty(), &mut body)
            .map_err(|_| CryptoError::Cipher)?;
        String::from_utf8(plain.to_vec()).map_err(|_| CryptoError::Malformed("plaintext is not utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        URL_SAFE.encode([7u8; 32])
    }

    #[test]
    fn encrypt_then_decrypt_recovers_token() {
        let cipher = AesGcmCipher::from_key_b64(&test_key());
        let sealed = cipher.encrypt("ya29.access-token").unwrap();
        assert!(sealed.starts_with("v1:"));
        assert_ne!(sealed, cipher.encrypt("ya29.access-token").unwrap());
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "ya29.access-token");
    }

    #[test]
    fn misconfigured_key_is_reported_on_use() {
        let missing = AesGcmCipher::from_key_b64("");
        assert_eq!(missing.encrypt("x"), Err(CryptoError::MissingKey));
        let short = AesGcmCipher::from_key_b64(&URL_SAFE.encode([1u8; 16]));
        assert_eq!(short.decrypt("v1:AAAA"), Err(CryptoError::InvalidKey));
    }

    #[test]
    fn rejects_foreign_versions_and_tampering() {
        let cipher = AesGcmCipher::from_key_b64(&test_key());
        let sealed = cipher.encrypt("secret").unwrap();
        let (_, body) = sealed.split_once(':').unwrap();
        assert_eq!(
            cipher.decrypt(&format!("v2:{body}")),
            Err(CryptoError::UnsupportedVersion("v2".into()))
        );
        assert!(matches!(cipher.decrypt("v1"), Err(CryptoError::Malformed(_))));

        let mut raw = URL_SAFE.decode(body).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = format!("v1:{}", URL_SAFE.encode(raw));
        assert_eq!(cipher.decrypt(&tampered), Err(CryptoError::Cipher));
    }
}
