//! Gemeinsame Typen fuer den Cipher-Layer

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Laenge des Session-Schluessels (AES-256)
pub const KEY_LEN: usize = 32;

/// Laenge der IV (96 Bit)
pub const IV_LEN: usize = 12;

/// Laenge des GCM-Auth-Tags
pub const TAG_LEN: usize = 16;

/// Kuerzester versiegelter Payload: IV + Tag bei leerem Klartext
pub const MIN_SEALED_LEN: usize = IV_LEN + TAG_LEN;

// ---------------------------------------------------------------------------
// SessionKey
// ---------------------------------------------------------------------------

/// Symmetrischer Schluessel einer einzelnen Session
///
/// Wird beim Drop genullt und nie ausgegeben.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey([REDACTED] {} bytes)", KEY_LEN)
    }
}

// ---------------------------------------------------------------------------
// SealedPayload
// ---------------------------------------------------------------------------

/// Versiegelter Payload (IV + Ciphertext + Auth-Tag)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// 12 Bytes IV, pro Aufruf von `seal` frisch aus dem OS-RNG
    pub iv: [u8; IV_LEN],
    /// Verschluesselter Inhalt inkl. 16 Bytes Auth-Tag (angehaengt)
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    /// Serialisiert zu Bytes: [iv(12)] + [ciphertext + tag]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Deserialisiert aus Bytes
    ///
    /// Alles unter `MIN_SEALED_LEN` kann kein gueltiger Tag sein und wird
    /// wie eine fehlgeschlagene Tag-Pruefung behandelt.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < MIN_SEALED_LEN {
            return Err(CryptoError::AuthenticationFailed);
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&bytes[..IV_LEN]);
        Ok(Self {
            iv,
            ciphertext: bytes[IV_LEN..].to_vec(),
        })
    }
}

/// Erzeugt ein zufaelliges Salt fuer die Schluesselableitung
pub fn generate_salt<const N: usize>() -> [u8; N] {
    let mut salt = [0u8; N];
    OsRng.fill_bytes(&mut salt);
    salt
}
