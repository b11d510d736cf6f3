//! Fehlertypen fuer den Cipher-Layer

use thiserror::Error;

/// Fehler im Cipher-Layer
///
/// Beide fachlichen Fehler sind fuer die Session fatal.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Tag-Pruefung fehlgeschlagen (falscher Schluessel, Korruption oder Manipulation)
    #[error("Authentifizierung fehlgeschlagen")]
    AuthenticationFailed,

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivationFailed(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
