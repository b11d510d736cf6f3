//! Payload-Verschluesselung
//!
//! AES-256-GCM mit zufaelliger 96-Bit IV pro Aufruf.
//!
//! ## Format
//! ```text
//! [iv(12)] [ciphertext + auth_tag(16)]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce as AesNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::types::{SealedPayload, SessionKey, IV_LEN, TAG_LEN};

fn cipher_fuer(key: &SessionKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Versiegelt einen Klartext mit dem Session-Schluessel
///
/// Jeder Aufruf zieht eine frische IV aus dem OS-RNG. Eine IV darf unter
/// demselben Schluessel nie zweimal verwendet werden.
pub fn seal(key: &SessionKey, plaintext: &[u8]) -> CryptoResult<SealedPayload> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher_fuer(key)
        .encrypt(AesNonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

    Ok(SealedPayload { iv, ciphertext })
}

/// Oeffnet einen versiegelten Payload
///
/// # Fehler
/// `AuthenticationFailed` bei Tag-Mismatch. Der Aufrufer muss die Session
/// beenden statt den Frame zu ueberspringen.
pub fn open(key: &SessionKey, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    cipher_fuer(key)
        .decrypt(AesNonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Oeffnet einen Frame-Payload im Format `IV | CIPHERTEXT+TAG`
pub fn open_payload(key: &SessionKey, bytes: &[u8]) -> CryptoResult<Vec<u8>> {
    let sealed = SealedPayload::from_bytes(bytes)?;
    open(key, &sealed.iv, &sealed.ciphertext)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
