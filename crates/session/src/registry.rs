//! Session-Registry
//!
//! Fuehrt alle lebenden Sessions eines Servers. Die Registry vermittelt
//! nichts zwischen Sessions; sie dient dem Limit, der Introspektion und dem
//! gezielten Trennen.
//!
//! Ein Platz wird beim Accept per [`SessionRegistry::reservieren`] belegt
//! und ueber den zurueckgegebenen [`SessionGuard`] beim Drop wieder
//! freigegeben. Limit-Pruefung und Eintragen passieren unter demselben Lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fosen_observability::TunnelMetrics;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::state::SessionState;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Eindeutige Session-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionInfo
// ---------------------------------------------------------------------------

/// Momentaufnahme einer Session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
    /// Erst nach erfolgreicher Anmeldung gesetzt
    pub username: Option<String>,
    pub verbunden_seit: DateTime<Utc>,
    /// Zeitpunkt des zuletzt empfangenen Frames
    pub letzte_aktivitaet: DateTime<Utc>,
    pub zustand: SessionState,
}

struct Eintrag {
    info: SessionInfo,
    shutdown_tx: watch::Sender<bool>,
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

pub struct SessionRegistry {
    max_sessions: usize,
    sessions: Mutex<HashMap<SessionId, Eintrag>>,
    metriken: TunnelMetrics,
}

impl SessionRegistry {
    pub fn neu(max_sessions: usize, metriken: TunnelMetrics) -> Arc<Self> {
        Arc::new(Self {
            max_sessions,
            sessions: Mutex::new(HashMap::new()),
            metriken,
        })
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Belegt einen Platz fuer eine neue Verbindung
    ///
    /// Gibt `None` zurueck wenn `max_sessions` erreicht ist.
    pub fn reservieren(self: &Arc<Self>, peer: SocketAddr) -> Option<SessionGuard> {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.max_sessions {
            self.metriken.sessions_rejected_total.inc();
            return None;
        }

        let id = SessionId::new();
        let jetzt = Utc::now();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        sessions.insert(
            id,
            Eintrag {
                info: SessionInfo {
                    id,
                    peer,
                    username: None,
                    verbunden_seit: jetzt,
                    letzte_aktivitaet: jetzt,
                    zustand: SessionState::Connected,
                },
                shutdown_tx,
            },
        );
        self.metriken.sessions_total.inc();
        self.metriken.sessions_active.set(sessions.len() as i64);

        Some(SessionGuard {
            registry: Arc::clone(self),
            id,
            shutdown_rx,
        })
    }

    /// Anzahl lebender Sessions
    pub fn anzahl(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Momentaufnahme aller Sessions, aelteste zuerst
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut liste: Vec<SessionInfo> = self
            .sessions
            .lock()
            .values()
            .map(|e| e.info.clone())
            .collect();
        liste.sort_by_key(|i| i.verbunden_seit);
        liste
    }

    pub fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.lock().get(&id).map(|e| e.info.clone())
    }

    /// Fordert eine einzelne Session zum Schliessen auf
    ///
    /// Ein laufender Lesevorgang der Session wird sofort abgebrochen.
    pub fn trennen(&self, id: SessionId) -> bool {
        match self.sessions.lock().get(&id) {
            Some(eintrag) => {
                eintrag.shutdown_tx.send_replace(true);
                tracing::debug!(session_id = %id, "Session wird getrennt");
                true
            }
            None => false,
        }
    }

    /// Fordert alle Sessions zum Schliessen auf
    pub fn alle_trennen(&self) -> usize {
        let sessions = self.sessions.lock();
        for eintrag in sessions.values() {
            eintrag.shutdown_tx.send_replace(true);
        }
        sessions.len()
    }

    fn aktualisieren(&self, id: SessionId, f: impl FnOnce(&mut SessionInfo)) {
        if let Some(eintrag) = self.sessions.lock().get_mut(&id) {
            f(&mut eintrag.info);
        }
    }

    fn entfernen(&self, id: SessionId) {
        let mut sessions = self.sessions.lock();
        sessions.remove(&id);
        self.metriken.sessions_active.set(sessions.len() as i64);
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("max_sessions", &self.max_sessions)
            .field("anzahl", &self.anzahl())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SessionGuard
// ---------------------------------------------------------------------------

/// Belegter Registry-Platz einer Session
///
/// Wird der Guard verworfen, verschwindet die Session aus der Registry.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Empfaenger fuer die Aufforderung zum Schliessen
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn zustand_setzen(&self, zustand: SessionState) {
        self.registry.aktualisieren(self.id, |info| info.zustand = zustand);
    }

    pub fn username_setzen(&self, username: &str) {
        self.registry
            .aktualisieren(self.id, |info| info.username = Some(username.to_string()));
    }

    /// Vermerkt einen empfangenen Frame
    pub fn aktivitaet_melden(&self) {
        let jetzt = Utc::now();
        self.registry
            .aktualisieren(self.id, |info| info.letzte_aktivitaet = jetzt);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.entfernen(self.id);
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard").field("id", &self.id).finish()
    }
}
