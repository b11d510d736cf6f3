//! Credential-Store
//!
//! Haelt die Zuordnung Benutzername -> Geheimnis im Speicher. Sessions
//! lesen nur; geaendert wird ausschliesslich ueber `add_user` und
//! `remove_user` durch den Betreiber des Servers.
//!
//! Das Geheimnis wird im Klartext gehalten, weil es gleichzeitig das
//! Ausgangsmaterial fuer den Session-Schluessel ist.

use std::collections::HashMap;

use constant_time_eq::constant_time_eq;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Maximale Laenge eines Benutzernamens in Bytes (passt in ein Laengen-Byte)
pub const MAX_USERNAME_LEN: usize = u8::MAX as usize;

/// Ein Eintrag wie er in der Konfiguration steht
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Benutzereintrag {
    pub username: String,
    pub secret: String,
}

impl Benutzereintrag {
    pub fn neu(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Benutzereintrag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Benutzereintrag")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Thread-sicherer In-Memory Credential-Store
#[derive(Default)]
pub struct CredentialStore {
    /// username -> secret
    eintraege: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    /// Erstellt einen leeren Store
    pub fn neu() -> Self {
        Self::default()
    }

    /// Erstellt einen Store aus Konfigurationseintraegen
    ///
    /// Spaetere Eintraege mit gleichem Namen ueberschreiben fruehere.
    pub fn aus_eintraegen<I>(eintraege: I) -> AuthResult<Self>
    where
        I: IntoIterator<Item = Benutzereintrag>,
    {
        let store = Self::neu();
        for eintrag in eintraege {
            store.add_user(eintrag.username, eintrag.secret)?;
        }
        Ok(store)
    }

    /// Fuegt einen Benutzer hinzu oder ueberschreibt sein Geheimnis
    pub fn add_user(&self, username: impl Into<String>, secret: impl Into<String>) -> AuthResult<()> {
        let username = username.into();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(AuthError::BenutzernameUngueltig(username));
        }

        let ersetzt = self
            .eintraege
            .write()
            .insert(username.clone(), secret.into())
            .is_some();
        tracing::debug!(username = %username, ersetzt, "Benutzer gespeichert");
        Ok(())
    }

    /// Entfernt einen Benutzer
    ///
    /// Laufende Sessions dieses Benutzers bleiben bestehen.
    pub fn remove_user(&self, username: &str) -> AuthResult<()> {
        match self.eintraege.write().remove(username) {
            Some(_) => {
                tracing::debug!(username = %username, "Benutzer entfernt");
                Ok(())
            }
            None => Err(AuthError::BenutzerNichtGefunden(username.to_string())),
        }
    }

    /// Prueft Benutzername und Passwort
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let eintraege = self.eintraege.read();
        match eintraege.get(username) {
            Some(secret) => constant_time_eq(secret.as_bytes(), password.as_bytes()),
            None => false,
        }
    }

    /// Wie `verify`, aber als `AuthResult`
    pub fn pruefen(&self, username: &str, password: &str) -> AuthResult<()> {
        if self.verify(username, password) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Gibt das gespeicherte Geheimnis fuer die Schluesselableitung zurueck
    pub fn secret(&self, username: &str) -> Option<String> {
        self.eintraege.read().get(username).cloned()
    }

    /// Alle Benutzernamen, sortiert
    pub fn usernames(&self) -> Vec<String> {
        let mut namen: Vec<String> = self.eintraege.read().keys().cloned().collect();
        namen.sort();
        namen
    }

    pub fn len(&self) -> usize {
        self.eintraege.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.read().is_empty()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("benutzer", &self.usernames())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
