//! Session-Zustandsautomat
//!
//! Server und Client treiben denselben Automaten. Der Zustand ist ein
//! expliziter Wert, damit Tests und die Registry ihn direkt lesen koennen.
//!
//! ```text
//! Connected --Handshake--> Authenticating --AuthAkzeptiert--> Established
//!                               |                                |  ^
//!                         AuthAbgelehnt              Daten/KeepAlive |
//!                               v                                v  |
//!                            Closing <--Disconnect/Schliessen/Timeout
//!                               |
//!                          Geschlossen
//!                               v
//!                            Closed
//!
//! Jeder Zustand --Fehler oder ungueltiges Ereignis--> Faulted
//! ```

use fosen_protocol::MessageKind;
use serde::Serialize;

use crate::error::{SessionError, SessionResult};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// TCP-Verbindung steht, Handshake ausstehend
    Connected,
    /// Schluessel abgeleitet, Anmeldung ausstehend
    Authenticating,
    /// Angemeldet, Datenaustausch
    Established,
    /// Abbau laeuft
    Closing,
    /// Geordnet beendet
    Closed,
    /// Durch Fehler beendet (absorbierend)
    Faulted,
}

impl SessionState {
    /// `Closed` und `Faulted` sind Endzustaende
    pub fn ist_beendet(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Faulted)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Connected => "connected",
            SessionState::Authenticating => "authenticating",
            SessionState::Established => "established",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Ereignis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ereignis {
    /// Handshake gesendet (Client) bzw. empfangen und beantwortet (Server)
    HandshakeAbgeschlossen,
    AuthAkzeptiert,
    AuthAbgelehnt,
    /// Data-Frame empfangen
    Daten,
    /// KeepAlive-Frame empfangen
    KeepAlive,
    /// Disconnect vom Peer
    Disconnect,
    /// Lokale Anforderung zum Schliessen
    Schliessen,
    /// Idle-Fenster abgelaufen
    Timeout,
    /// Verbindung freigegeben
    Geschlossen,
    /// Protokoll-, Krypto- oder Transportfehler
    Fehler,
}

impl std::fmt::Display for Ereignis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Zustandsautomat
// ---------------------------------------------------------------------------

/// Expliziter Zustandsautomat einer Session
#[derive(Debug, Clone)]
pub struct Zustandsautomat {
    zustand: SessionState,
}

impl Default for Zustandsautomat {
    fn default() -> Self {
        Self::neu()
    }
}

impl Zustandsautomat {
    pub fn neu() -> Self {
        Self {
            zustand: SessionState::Connected,
        }
    }

    pub fn zustand(&self) -> SessionState {
        self.zustand
    }

    /// Uebergangstabelle
    ///
    /// `None` heisst: Ereignis im Zustand nicht erlaubt.
    fn ziel(zustand: SessionState, ereignis: Ereignis) -> Option<SessionState> {
        use Ereignis as E;
        use SessionState as S;

        match (zustand, ereignis) {
            (S::Connected, E::HandshakeAbgeschlossen) => Some(S::Authenticating),
            (S::Authenticating, E::AuthAkzeptiert) => Some(S::Established),
            (S::Authenticating, E::AuthAbgelehnt) => Some(S::Closing),
            (S::Established, E::Daten | E::KeepAlive) => Some(S::Established),
            (S::Established, E::Disconnect) => Some(S::Closing),
            (S::Connected | S::Authenticating | S::Established, E::Schliessen | E::Timeout) => {
                Some(S::Closing)
            }
            (S::Closing, E::Geschlossen) => Some(S::Closed),
            (S::Closed, _) => None,
            (_, E::Fehler) => Some(S::Faulted),
            _ => None,
        }
    }

    /// Fuehrt einen Uebergang aus
    ///
    /// Ein ungueltiges Ereignis setzt den Automaten auf `Faulted`.
    /// In `Closed` und `Faulted` bleibt der Zustand unveraendert.
    pub fn uebergang(&mut self, ereignis: Ereignis) -> SessionResult<SessionState> {
        match Self::ziel(self.zustand, ereignis) {
            Some(neu) => {
                tracing::trace!(von = %self.zustand, nach = %neu, ereignis = %ereignis, "Zustandswechsel");
                self.zustand = neu;
                Ok(neu)
            }
            None => Err(self.ablehnen(ereignis.to_string())),
        }
    }

    /// Ein Frame dieses Typs war im aktuellen Zustand nicht erwartet
    pub fn unerwartet(&mut self, kind: MessageKind) -> SessionError {
        self.ablehnen(format!("Frame {kind}"))
    }

    fn ablehnen(&mut self, ereignis: String) -> SessionError {
        let zustand = self.zustand;
        if !zustand.ist_beendet() {
            self.zustand = SessionState::Faulted;
        }
        SessionError::UngueltigerUebergang { zustand, ereignis }
    }
}
