//! Fehlertypen fuer Sessions

use fosen_auth::AuthError;
use fosen_crypto::CryptoError;
use fosen_protocol::ProtocolError;
use thiserror::Error;

use crate::state::SessionState;

/// Fehler auf Transportebene
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Verbindung abgelehnt")]
    ConnectionRefused,

    #[error("Verbindung vom Peer getrennt")]
    ConnectionReset,

    #[error("Zeitueberschreitung")]
    Timeout,
}

/// Fehlertyp fuer eine Session
///
/// Protokoll- und Kryptofehler sind immer fatal fuer die Verbindung.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Protokollfehler: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Kryptofehler: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Authentifizierungsfehler: {0}")]
    Auth(#[from] AuthError),

    #[error("Transportfehler: {0}")]
    Transport(#[from] TransportError),

    /// Ereignis im aktuellen Zustand nicht erlaubt
    #[error("Ungueltiger Uebergang: {ereignis} im Zustand {zustand}")]
    UngueltigerUebergang {
        zustand: SessionState,
        ereignis: String,
    },

    /// Keine Frames innerhalb des Idle-Fensters
    #[error("Idle-Timeout")]
    Timeout,

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SessionError {
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}

/// Result-Typ fuer Sessions
pub type SessionResult<T> = Result<T, SessionError>;
