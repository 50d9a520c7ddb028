//! PII at rest: deterministic document hashing plus reversible field
//! encryption.
//!
//! The document hash is the lookup key for an application without decrypting
//! anything, so its definition is frozen: changing it breaks every historical
//! lookup. Field encryption is AES-256-GCM under a key derived once from the
//! configured master secret; ciphertexts are self-contained
//! (`base64url(nonce || ciphertext || tag)`).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Fixed KDF salt. Versioned in the name: bump only together with a data
/// migration, since existing rows are encrypted under the derived key.
const KDF_SALT: &[u8] = b"loan_pii_salt_v1";
const KDF_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;

/// Searchable digest of (country, document): `SHA256(UPPER(country:document))`
/// as 64 hex chars. Whitespace around either part and the case of the country
/// code do not affect the result.
pub fn hash_document(document_number: &str, country_code: &str) -> String {
    let combined = format!("{}:{}", country_code.trim(), document_number.trim()).to_uppercase();
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PiiError {
    /// Input is not valid base64url or is shorter than a nonce.
    #[error("ciphertext is not a valid encrypted value")]
    InvalidEncoding,
    /// Authentication tag mismatch: wrong key or tampered data.
    #[error("decryption failed: authentication tag mismatch")]
    AuthFailed,
    #[error("encryption failed")]
    EncryptFailed,
}

/// Process-scoped codec holding the derived key. Construct once at startup
/// and share by reference; there is no global instance.
#[derive(Clone)]
pub struct PiiCodec {
    cipher: Aes256Gcm,
}

impl PiiCodec {
    /// Derive the AES-256 key from the master secret with
    /// PBKDF2-HMAC-SHA256 (100 000 iterations, fixed salt).
    pub fn new(master_secret: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(master_secret.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
        let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key is always valid");
        Self { cipher }
    }

    /// Encrypt a field value. Empty input passes through unchanged so that
    /// optional columns stay optional.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, PiiError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| PiiError::EncryptFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypt a field value. Empty input passes through unchanged.
    pub fn decrypt(&self, value: &str) -> Result<String, PiiError> {
        if value.is_empty() {
            return Ok(String::new());
        }

        let raw = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| PiiError::InvalidEncoding)?;
        if raw.len() <= NONCE_LEN {
            return Err(PiiError::InvalidEncoding);
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| PiiError::AuthFailed)?;

        String::from_utf8(plaintext).map_err(|_| PiiError::AuthFailed)
    }

    /// Lenient read-path decryption: legacy rows predating encryption (or a
    /// rotated key) come back as-is instead of failing the request. Callers
    /// decide whether to log or substitute a sentinel.
    pub fn decrypt_or_original(&self, value: &str) -> String {
        match self.decrypt(value) {
            Ok(plain) => plain,
            Err(_) => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> PiiCodec {
        PiiCodec::new("unit-test-master-secret")
    }

    #[test]
    fn hash_matches_known_vector() {
        assert_eq!(
            hash_document("12345678Z", "ES"),
            "923cb799afc442e70a803a4d552d791bb3480890cbf80715a6dff504fe4b80a3"
        );
        assert_eq!(
            hash_document("KYBB010115HDFDFCX0", "MX"),
            "d6a125d25999ba8fc916ad61e993c5e9576cac90b65526441e07166e7d2df299"
        );
    }

    #[test]
    fn hash_ignores_whitespace_and_country_case() {
        let base = hash_document("12345678Z", "ES");
        assert_eq!(hash_document("  12345678Z  ", "es"), base);
        assert_eq!(hash_document("12345678z", "Es"), base);
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let c = codec();
        for input in ["12345678Z", "María García-López", "多字节 документ"] {
            let sealed = c.encrypt(input).unwrap();
            assert_ne!(sealed, input);
            assert_eq!(c.decrypt(&sealed).unwrap(), input);
        }
    }

    #[test]
    fn empty_passes_through_both_ways() {
        let c = codec();
        assert_eq!(c.encrypt("").unwrap(), "");
        assert_eq!(c.decrypt("").unwrap(), "");
    }

    #[test]
    fn nonces_make_ciphertexts_distinct() {
        let c = codec();
        let a = c.encrypt("same input").unwrap();
        let b = c.encrypt("same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).unwrap(), c.decrypt(&b).unwrap());
    }

    #[test]
    fn tampering_fails_with_auth_error() {
        let c = codec();
        let sealed = c.encrypt("sensitive").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(raw);
        assert_eq!(c.decrypt(&tampered), Err(PiiError::AuthFailed));
    }

    #[test]
    fn garbage_fails_with_encoding_error() {
        let c = codec();
        assert_eq!(c.decrypt("not base64 !!!"), Err(PiiError::InvalidEncoding));
        // Valid base64 but shorter than a nonce.
        assert_eq!(c.decrypt("AAAA"), Err(PiiError::InvalidEncoding));
    }

    #[test]
    fn legacy_plaintext_survives_lenient_read() {
        let c = codec();
        assert_eq!(c.decrypt_or_original("plain legacy row"), "plain legacy row");
        let sealed = c.encrypt("real value").unwrap();
        assert_eq!(c.decrypt_or_original(&sealed), "real value");
    }

    #[test]
    fn different_secrets_cannot_read_each_other() {
        let a = PiiCodec::new("secret-a");
        let b = PiiCodec::new("secret-b");
        let sealed = a.encrypt("cross-key").unwrap();
        assert_eq!(b.decrypt(&sealed), Err(PiiError::AuthFailed));
    }
}
