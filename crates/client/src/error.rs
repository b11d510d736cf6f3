//! Fehlertypen fuer den Client

use fosen_session::SessionError;
use thiserror::Error;

/// Fehler beim Verbindungsaufbau
///
/// Eine Variante je Ursache: Server nicht erreichbar, Anmeldung
/// abgelehnt, Protokollproblem oder Zeitueberschreitung.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Server nicht erreichbar oder Verbindung vor dem Handshake geschlossen
    #[error("Verbindung abgelehnt: {0}")]
    ConnectionRefused(String),

    #[error("Anmeldung abgelehnt")]
    AuthRejected,

    #[error("Handshake fehlgeschlagen: {0}")]
    HandshakeFailed(String),

    #[error("Zeitueberschreitung beim Verbindungsaufbau")]
    Timeout,
}

/// Fehler einer aufgebauten Session
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Session geschlossen")]
    Geschlossen,

    #[error(transparent)]
    Session(#[from] SessionError),
}
