//! Fehlertypen fuer das Wire-Protokoll

use thiserror::Error;

/// Protokollfehler beim Lesen oder Schreiben von Frames
///
/// Jeder dieser Fehler ist fuer die Verbindung fatal. Es gibt keinen
/// Versuch, nach einem fehlerhaften Frame wieder aufzusetzen.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Ungueltige Magic-Bytes")]
    BadMagic,

    #[error("Frame zu gross: {laenge} Bytes (Maximum: {maximum} Bytes)")]
    FrameTooLarge { laenge: usize, maximum: usize },

    #[error("Frame unvollstaendig: Stream vor Ende des Frames beendet")]
    Truncated,

    #[error("Protokollversion nicht unterstuetzt: erwartet={erwartet}, erhalten={erhalten}")]
    UnsupportedVersion { erwartet: u8, erhalten: u8 },

    #[error("Unbekannter Nachrichtentyp: {0:#04x}")]
    UnknownKind(u8),

    #[error("Ungueltiger Payload: {0}")]
    UngueltigerPayload(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn payload(msg: impl Into<String>) -> Self {
        Self::UngueltigerPayload(msg.into())
    }
}

/// Result-Alias fuer das Wire-Protokoll
pub type ProtocolResult<T> = Result<T, ProtocolError>;
