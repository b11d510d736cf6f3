//! Schluesselableitung
//!
//! PBKDF2-HMAC-SHA256 mit hoher Iterationszahl. Die Ableitung ist absichtlich
//! teuer und laeuft genau einmal pro Session, nie pro Nachricht.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::types::{SessionKey, KEY_LEN};

/// Standard-Iterationszahl
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Untergrenze, darunter wird die Ableitung verweigert
pub const MIN_ITERATIONS: u32 = 100_000;

/// Leitet einen 256-Bit Session-Schluessel aus Geheimnis und Salt ab
///
/// CPU-gebunden. In async Code ueber `spawn_blocking` aufrufen.
///
/// # Fehler
/// `KeyDerivationFailed` bei leerem Salt oder zu wenigen Iterationen.
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32) -> CryptoResult<SessionKey> {
    if salt.is_empty() {
        return Err(CryptoError::KeyDerivationFailed("Salt ist leer".into()));
    }
    if iterations < MIN_ITERATIONS {
        return Err(CryptoError::KeyDerivationFailed(format!(
            "zu wenige Iterationen: {iterations} (Minimum: {MIN_ITERATIONS})"
        )));
    }

    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(secret, salt, iterations, &mut key);
    let session_key = SessionKey::from_bytes(key);
    key.zeroize();
    Ok(session_key)
}
