//! Handshake- und Auth-Payloads
//!
//! Der Handshake ist binaer und unverschluesselt, weil zu diesem Zeitpunkt
//! noch kein Schluessel existiert. Die Auth-Nachrichten sind JSON und werden
//! vor dem Versand versiegelt.
//!
//! ## Handshake-Request
//! ```text
//! VERSION(1) | SALT(16) | USERNAME_LEN(1) | USERNAME(UTF-8)
//! ```
//!
//! ## Handshake-Response
//! ```text
//! VERSION(1) | STATUS(1)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Aktuelle Protokollversion
pub const PROTOCOL_VERSION: u8 = 1;

/// Laenge des Salts im Handshake
pub const SALT_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Erster Frame des Clients
///
/// Der Benutzername steht im Klartext, damit der Server weiss, mit welchem
/// gespeicherten Geheimnis er den Session-Schluessel ableiten muss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub version: u8,
    pub salt: [u8; SALT_LEN],
    pub username: String,
}

impl HandshakeRequest {
    pub fn neu(salt: [u8; SALT_LEN], username: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            salt,
            username: username.into(),
        }
    }

    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        let name = self.username.as_bytes();
        if name.len() > u8::MAX as usize {
            return Err(ProtocolError::payload(format!(
                "Benutzername zu lang: {} Bytes",
                name.len()
            )));
        }

        let mut out = Vec::with_capacity(2 + SALT_LEN + name.len());
        out.push(self.version);
        out.extend_from_slice(&self.salt);
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        Ok(out)
    }

    /// Parst einen Handshake-Request
    ///
    /// Die Version wird zuerst geprueft, damit ein Client mit fremder
    /// Version auch bei abweichendem Layout eine klare Ablehnung erhaelt.
    pub fn from_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        let version = *bytes
            .first()
            .ok_or_else(|| ProtocolError::payload("Handshake leer"))?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                erwartet: PROTOCOL_VERSION,
                erhalten: version,
            });
        }

        if bytes.len() < 2 + SALT_LEN {
            return Err(ProtocolError::payload("Handshake zu kurz"));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[1..1 + SALT_LEN]);

        let name_len = bytes[1 + SALT_LEN] as usize;
        let rest = &bytes[2 + SALT_LEN..];
        if rest.len() != name_len {
            return Err(ProtocolError::payload(format!(
                "Benutzername-Laenge passt nicht: erwartet={}, vorhanden={}",
                name_len,
                rest.len()
            )));
        }

        let username = std::str::from_utf8(rest)
            .map_err(|_| ProtocolError::payload("Benutzername ist kein UTF-8"))?
            .to_string();

        Ok(Self {
            version,
            salt,
            username,
        })
    }
}

/// Status der Handshake-Antwort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeStatus {
    Ok = 0,
    VersionAbgelehnt = 1,
}

impl TryFrom<u8> for HandshakeStatus {
    type Error = ProtocolError;

    fn try_from(wert: u8) -> Result<Self, Self::Error> {
        match wert {
            0 => Ok(Self::Ok),
            1 => Ok(Self::VersionAbgelehnt),
            andere => Err(ProtocolError::payload(format!(
                "Unbekannter Handshake-Status: {andere}"
            ))),
        }
    }
}

/// Antwort des Servers auf den Handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub version: u8,
    pub status: HandshakeStatus,
}

impl HandshakeResponse {
    pub fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            status: HandshakeStatus::Ok,
        }
    }

    pub fn version_abgelehnt() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            status: HandshakeStatus::VersionAbgelehnt,
        }
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [self.version, self.status as u8]
    }

    pub fn from_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.len() != 2 {
            return Err(ProtocolError::payload(format!(
                "Handshake-Antwort hat {} statt 2 Bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            version: bytes[0],
            status: HandshakeStatus::try_from(bytes[1])?,
        })
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Anmeldedaten des Clients (Klartext vor dem Versiegeln)
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
    /// Unix-Timestamp in Sekunden zum Zeitpunkt der Anfrage
    pub timestamp: i64,
}

impl AuthRequest {
    pub fn neu(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::payload(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::payload(e.to_string()))
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Accepted,
    Rejected,
}

/// Ergebnis der Anmeldung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub status: AuthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthResponse {
    pub fn akzeptiert() -> Self {
        Self {
            status: AuthStatus::Accepted,
            message: None,
        }
    }

    pub fn abgelehnt(grund: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::Rejected,
            message: Some(grund.into()),
        }
    }

    pub fn ist_akzeptiert(&self) -> bool {
        self.status == AuthStatus::Accepted
    }

    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::payload(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::payload(e.to_string()))
    }
}
