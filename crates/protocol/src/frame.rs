//! Frame und Nachrichtentypen
//!
//! Ein `Frame` ist die kleinste Einheit auf dem Byte-Stream. Er wird direkt
//! vor dem Schreiben erzeugt und nach dem Verarbeiten verworfen.

use bytes::Bytes;

use crate::error::ProtocolError;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Geschlossene Menge aller Nachrichtentypen
///
/// Der Wert entspricht dem TYPE-Byte im Frame-Header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Unverschluesselter Verbindungsaufbau (Version + Salt)
    Handshake = 0x01,
    /// Anmeldung (versiegelt)
    Auth = 0x02,
    /// Anwendungsdaten (versiegelt)
    Data = 0x03,
    /// Lebenszeichen ohne Inhalt (versiegelt)
    KeepAlive = 0x04,
    /// Geordneter Verbindungsabbau (versiegelt)
    Disconnect = 0x05,
}

impl MessageKind {
    pub const ALLE: [MessageKind; 5] = [
        MessageKind::Handshake,
        MessageKind::Auth,
        MessageKind::Data,
        MessageKind::KeepAlive,
        MessageKind::Disconnect,
    ];

    /// Gibt das TYPE-Byte fuer den Header zurueck
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Alle Typen ausser `Handshake` tragen einen versiegelten Payload
    pub fn ist_versiegelt(self) -> bool {
        !matches!(self, MessageKind::Handshake)
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(wert: u8) -> Result<Self, Self::Error> {
        match wert {
            0x01 => Ok(Self::Handshake),
            0x02 => Ok(Self::Auth),
            0x03 => Ok(Self::Data),
            0x04 => Ok(Self::KeepAlive),
            0x05 => Ok(Self::Disconnect),
            andere => Err(ProtocolError::UnknownKind(andere)),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Handshake => write!(f, "handshake"),
            MessageKind::Auth => write!(f, "auth"),
            MessageKind::Data => write!(f, "data"),
            MessageKind::KeepAlive => write!(f, "keepalive"),
            MessageKind::Disconnect => write!(f, "disconnect"),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ein einzelner Protokoll-Frame: Typ + laengenpraefixierter Payload
///
/// Invariante: die LENGTH im Header ist immer `payload.len()`. Sie wird
/// deshalb nicht separat gespeichert, sondern beim Kodieren berechnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn neu(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Frame ohne Payload
    pub fn leer(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: Bytes::new(),
        }
    }

    /// Laenge des Payloads wie sie im Header steht
    pub fn length(&self) -> usize {
        self.payload.len()
    }
}
