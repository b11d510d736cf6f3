//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `TunnelServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task mit einer `ServerSession`.
//!
//! ## Backpressure
//! Ist `max_sessions` erreicht, wird eine neue Verbindung angenommen und
//! sofort wieder geschlossen. Es wird kein Frame gelesen und nichts
//! gesendet. Es gibt keine Warteschlange.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tracing::Instrument;

use crate::registry::SessionRegistry;
use crate::session::{ServerSession, SessionKontext};
use crate::state::SessionState;

/// TCP-Tunnel-Server
pub struct TunnelServer {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    kontext: Arc<SessionKontext>,
}

impl TunnelServer {
    /// Bindet den Listener
    ///
    /// Port 0 waehlt einen freien Port, siehe [`TunnelServer::lokale_adresse`].
    pub async fn binden(
        adresse: impl ToSocketAddrs,
        kontext: SessionKontext,
        max_sessions: usize,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(adresse).await?;
        let registry = SessionRegistry::neu(max_sessions, kontext.metriken.clone());
        Ok(Self {
            listener,
            registry,
            kontext: Arc::new(kontext),
        })
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registry fuer Introspektion und Trennen einzelner Sessions
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    ///
    /// Beim Shutdown werden alle lebenden Sessions zum Schliessen aufgefordert.
    pub async fn starten(self, mut shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(
            adresse = %lokale_addr,
            max_sessions = self.registry.max_sessions(),
            "Tunnel-Server gestartet"
        );

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.annehmen(stream, peer_addr),
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let anzahl = self.registry.alle_trennen();
                        tracing::info!(sessions = anzahl, "Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("Tunnel-Server gestoppt");
        Ok(())
    }

    fn annehmen(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let Some(guard) = self.registry.reservieren(peer_addr) else {
            tracing::warn!(
                peer = %peer_addr,
                max = self.registry.max_sessions(),
                "Server voll – Verbindung geschlossen"
            );
            drop(stream);
            return;
        };

        let _ = stream.set_nodelay(true);
        let span = tracing::info_span!("session", session_id = %guard.id(), peer = %peer_addr);
        let session = ServerSession::neu(Arc::clone(&self.kontext), guard, peer_addr);

        tokio::spawn(
            async move {
                tracing::debug!("Verbindung akzeptiert");
                let ende = session.verarbeiten(stream).await;
                match (&ende.zustand, &ende.fehler) {
                    (SessionState::Faulted, _) => {}
                    (_, Some(grund)) => {
                        tracing::info!(username = ?ende.username, grund = %grund, "Session beendet");
                    }
                    (_, None) => {
                        tracing::info!(username = ?ende.username, "Session beendet");
                    }
                }
            }
            .instrument(span),
        );
    }
}

impl std::fmt::Debug for TunnelServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelServer")
            .field("listener", &self.listener.local_addr().ok())
            .field("registry", &self.registry)
            .finish()
    }
}
