//! Aufgebaute Client-Session
//!
//! Ein Hintergrund-Task besitzt den Stream und den Schluessel. Er versiegelt
//! ausgehende Daten, oeffnet eingehende Frames, sendet KeepAlives und fuehrt
//! den Zustandsautomaten. Die [`ClientSession`] spricht nur ueber Channels
//! mit ihm.
//!
//! Kommt laenger als `idle_timeout` kein Frame vom Server, schliesst der
//! Task die Session und `receive` liefert `SessionError::Timeout`.
//!
//! Die Channels sind begrenzt: liest der Aufrufer nicht, staut sich der
//! Empfang und damit irgendwann auch `send`.

use std::time::Duration;

use fosen_crypto::SessionKey;
use fosen_protocol::{Frame, FrameCodec, MessageKind};
use fosen_session::{
    frame_oeffnen, frame_versiegeln, Ereignis, SessionError, SessionResult, SessionState,
    Zustandsautomat,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::error::ClientError;

const KANAL_KAPAZITAET: usize = 64;

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// Angemeldete Verbindung zum Server
///
/// Wird die Session verworfen ohne `close`, sendet der Hintergrund-Task
/// trotzdem noch einen Disconnect.
pub struct ClientSession {
    ausgang_tx: mpsc::Sender<Vec<u8>>,
    eingang_rx: mpsc::Receiver<SessionResult<Vec<u8>>>,
    zustand_rx: watch::Receiver<SessionState>,
    schliessen_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ClientSession {
    pub(crate) fn starten(
        framed: Framed<TcpStream, FrameCodec>,
        key: SessionKey,
        automat: Zustandsautomat,
        keepalive: Duration,
        idle_timeout: Duration,
    ) -> Self {
        let (ausgang_tx, ausgang_rx) = mpsc::channel(KANAL_KAPAZITAET);
        let (eingang_tx, eingang_rx) = mpsc::channel(KANAL_KAPAZITAET);
        let (zustand_tx, zustand_rx) = watch::channel(automat.zustand());
        let (schliessen_tx, schliessen_rx) = watch::channel(false);

        let hintergrund = Hintergrund {
            framed,
            key,
            automat,
            zustand_tx,
            eingang_tx,
            ausgang_rx,
            schliessen_rx,
            keepalive,
            idle_timeout,
        };
        let task = tokio::spawn(hintergrund.laufen());

        Self {
            ausgang_tx,
            eingang_rx,
            zustand_rx,
            schliessen_tx,
            task: Some(task),
        }
    }

    /// Sendet Klartext als versiegelten Data-Frame
    pub async fn send(&self, klartext: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        if self.state() != SessionState::Established {
            return Err(ClientError::Geschlossen);
        }
        self.ausgang_tx
            .send(klartext.into())
            .await
            .map_err(|_| ClientError::Geschlossen)
    }

    /// Wartet auf den naechsten Data-Payload
    ///
    /// KeepAlives werden im Hintergrund verbraucht. Nach Disconnect oder
    /// Verbindungsende liefert der Aufruf `ClientError::Geschlossen`, nach
    /// Ablauf des Idle-Timeouts einmalig `SessionError::Timeout`.
    pub async fn receive(&mut self) -> Result<Vec<u8>, ClientError> {
        match self.eingang_rx.recv().await {
            Some(Ok(klartext)) => Ok(klartext),
            Some(Err(fehler)) => Err(fehler.into()),
            None => Err(ClientError::Geschlossen),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.zustand_rx.borrow()
    }

    /// Beobachter fuer Zustandswechsel
    pub fn zustand_beobachten(&self) -> watch::Receiver<SessionState> {
        self.zustand_rx.clone()
    }

    /// Sendet einen Disconnect und wartet bis der Stream freigegeben ist
    pub async fn close(&mut self) {
        self.schliessen_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(fehler = %e, "Session-Task abgebrochen");
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.schliessen_tx.send_replace(true);
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("zustand", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Hintergrund-Task
// ---------------------------------------------------------------------------

enum Steuerung {
    Weiter,
    Ende,
}

struct Hintergrund {
    framed: Framed<TcpStream, FrameCodec>,
    key: SessionKey,
    automat: Zustandsautomat,
    zustand_tx: watch::Sender<SessionState>,
    eingang_tx: mpsc::Sender<SessionResult<Vec<u8>>>,
    ausgang_rx: mpsc::Receiver<Vec<u8>>,
    schliessen_rx: watch::Receiver<bool>,
    keepalive: Duration,
    idle_timeout: Duration,
}

/// Wartet bis `close` aufgerufen oder die Session verworfen wurde
async fn schliessen_angefordert(rx: &mut watch::Receiver<bool>) -> Result<(), watch::error::RecvError> {
    rx.wait_for(|v| *v).await.map(drop)
}

impl Hintergrund {
    async fn laufen(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.keepalive, self.keepalive);
        let mut frist = Instant::now() + self.idle_timeout;

        loop {
            let ergebnis = tokio::select! {
                eingang = self.framed.next() => match eingang {
                    Some(Ok(frame)) => {
                        frist = Instant::now() + self.idle_timeout;
                        self.frame_verarbeiten(frame).await
                    }
                    Some(Err(e)) => Err(e.into()),
                    None => self.verbindung_beendet(),
                },

                ausgehend = self.ausgang_rx.recv() => match ausgehend {
                    Some(klartext) => self.senden(MessageKind::Data, &klartext).await,
                    // ClientSession verworfen
                    None => self.schliessen().await,
                },

                _ = ticker.tick() => self.senden(MessageKind::KeepAlive, &[]).await,

                _ = tokio::time::sleep_until(frist) => self.idle_abgelaufen().await,

                Ok(()) = schliessen_angefordert(&mut self.schliessen_rx) => self.schliessen().await,
            };

            match ergebnis {
                Ok(Steuerung::Weiter) => {}
                Ok(Steuerung::Ende) => break,
                Err(fehler) => {
                    self.fehlgeschlagen(fehler);
                    break;
                }
            }
        }
    }

    async fn frame_verarbeiten(&mut self, frame: Frame) -> SessionResult<Steuerung> {
        tracing::trace!(kind = %frame.kind, laenge = frame.length(), "Frame empfangen");
        match frame.kind {
            MessageKind::Data => {
                let klartext = frame_oeffnen(&self.key, &frame)?;
                self.uebergang(Ereignis::Daten)?;
                // Volle Queue blockiert den Empfang, ein Schliessen aber nicht
                tokio::select! {
                    _ = self.eingang_tx.send(Ok(klartext)) => Ok(Steuerung::Weiter),
                    Ok(()) = schliessen_angefordert(&mut self.schliessen_rx) => self.schliessen().await,
                }
            }
            MessageKind::KeepAlive => {
                frame_oeffnen(&self.key, &frame)?;
                self.uebergang(Ereignis::KeepAlive)?;
                Ok(Steuerung::Weiter)
            }
            MessageKind::Disconnect => {
                let grund = frame_oeffnen(&self.key, &frame)?;
                self.uebergang(Ereignis::Disconnect)?;
                self.disconnect_senden(b"Disconnect bestaetigt").await;
                self.uebergang(Ereignis::Geschlossen)?;
                tracing::info!(grund = %String::from_utf8_lossy(&grund), "Disconnect vom Server");
                Ok(Steuerung::Ende)
            }
            andere => {
                let fehler = self.automat.unerwartet(andere);
                self.zustand_tx.send_replace(self.automat.zustand());
                Err(fehler)
            }
        }
    }

    fn verbindung_beendet(&mut self) -> SessionResult<Steuerung> {
        self.uebergang(Ereignis::Disconnect)?;
        self.uebergang(Ereignis::Geschlossen)?;
        tracing::info!("Server hat die Verbindung getrennt");
        Ok(Steuerung::Ende)
    }

    async fn senden(&mut self, kind: MessageKind, klartext: &[u8]) -> SessionResult<Steuerung> {
        let frame = frame_versiegeln(&self.key, kind, klartext)?;
        self.framed.send(frame).await?;
        Ok(Steuerung::Weiter)
    }

    /// Lokales Schliessen mit Disconnect (best effort)
    async fn schliessen(&mut self) -> SessionResult<Steuerung> {
        self.uebergang(Ereignis::Schliessen)?;
        self.disconnect_senden(b"Client beendet").await;
        self.uebergang(Ereignis::Geschlossen)?;
        tracing::info!("Session geschlossen");
        Ok(Steuerung::Ende)
    }

    /// Server hat zu lange nichts gesendet
    async fn idle_abgelaufen(&mut self) -> SessionResult<Steuerung> {
        self.uebergang(Ereignis::Timeout)?;
        tracing::warn!(
            idle_timeout_ms = self.idle_timeout.as_millis() as u64,
            "Idle-Timeout, Session wird geschlossen"
        );
        self.disconnect_senden(b"Idle-Timeout").await;
        self.uebergang(Ereignis::Geschlossen)?;
        let _ = self.eingang_tx.try_send(Err(SessionError::Timeout));
        Ok(Steuerung::Ende)
    }

    /// Fehler beim Senden werden nur protokolliert
    async fn disconnect_senden(&mut self, grund: &[u8]) {
        match frame_versiegeln(&self.key, MessageKind::Disconnect, grund) {
            Ok(frame) => {
                if let Err(e) = self.framed.send(frame).await {
                    tracing::debug!(fehler = %e, "Disconnect konnte nicht gesendet werden");
                }
            }
            Err(e) => tracing::debug!(fehler = %e, "Disconnect konnte nicht versiegelt werden"),
        }
    }

    fn fehlgeschlagen(&mut self, fehler: SessionError) {
        let _ = self.automat.uebergang(Ereignis::Fehler);
        self.zustand_tx.send_replace(self.automat.zustand());
        tracing::warn!(fehler = %fehler, "Session fehlerhaft beendet");
        let _ = self.eingang_tx.try_send(Err(fehler));
    }

    fn uebergang(&mut self, ereignis: Ereignis) -> SessionResult<SessionState> {
        let ergebnis = self.automat.uebergang(ereignis);
        self.zustand_tx.send_replace(self.automat.zustand());
        ergebnis
    }
}
