//! Datenempfaenger fuer entschluesselte Anwendungsdaten

/// Nimmt den Klartext jedes Data-Frames entgegen
///
/// Eine zurueckgegebene Antwort wird versiegelt und als Data-Frame an den
/// Client gesendet. Der Inhalt wird von der Session nicht interpretiert.
pub trait DataHandler: Send + Sync + 'static {
    fn verarbeiten(&self, username: &str, payload: Vec<u8>) -> Option<Vec<u8>>;
}

/// Sendet jeden Payload unveraendert zurueck
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl DataHandler for EchoHandler {
    fn verarbeiten(&self, username: &str, payload: Vec<u8>) -> Option<Vec<u8>> {
        tracing::debug!(username = %username, bytes = payload.len(), "Echo");
        Some(payload)
    }
}
