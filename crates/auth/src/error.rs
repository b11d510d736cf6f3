//! Fehlertypen fuer den Credential-Store

use thiserror::Error;

/// Alle moeglichen Fehler im Credential-Store
#[derive(Debug, Error)]
pub enum AuthError {
    // --- Authentifizierung ---
    #[error("Benutzername oder Passwort falsch")]
    InvalidCredentials,

    // --- Benutzerverwaltung ---
    #[error("Ungueltiger Benutzername: {0}")]
    BenutzernameUngueltig(String),

    #[error("Benutzer nicht gefunden: {0}")]
    BenutzerNichtGefunden(String),
}

/// Result-Alias fuer den Credential-Store
pub type AuthResult<T> = Result<T, AuthError>;
