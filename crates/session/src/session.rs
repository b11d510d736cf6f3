//! Serverseitige Session
//!
//! Jede angenommene Verbindung bekommt eine `ServerSession` in einem eigenen
//! tokio-Task. Die Session besitzt ihren Schluessel und ihren Zustand
//! exklusiv; geteilt wird nur der lesende Zugriff auf den Credential-Store.
//!
//! ## Ablauf
//! ```text
//! Client                                  Server
//!   | -- Handshake(version, salt, user) --> |  Connected
//!   | <-- Handshake(version, status) ------ |  -> Authenticating, KDF
//!   | -- Auth{user, password} (sealed) ---> |
//!   | <-- Auth{accepted|rejected} (sealed)- |  -> Established | Closing
//!   | <=== Data / KeepAlive (sealed) =====> |
//!   | -- Disconnect (sealed) -------------> |  -> Closing
//!   | <-- Disconnect (sealed) ------------- |  -> Closed
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fosen_auth::{AuthError, CredentialStore};
use fosen_crypto::{derive_key, generate_salt, CryptoError, SessionKey, DEFAULT_ITERATIONS};
use fosen_observability::TunnelMetrics;
use fosen_protocol::wire::DEFAULT_MAX_FRAME_SIZE;
use fosen_protocol::{
    AuthRequest, AuthResponse, Frame, FrameCodec, HandshakeRequest, HandshakeResponse, MessageKind,
    ProtocolError,
};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use zeroize::Zeroizing;

use crate::error::{SessionError, SessionResult, TransportError};
use crate::handler::{DataHandler, EchoHandler};
use crate::registry::SessionGuard;
use crate::sealing::{frame_oeffnen, frame_versiegeln};
use crate::state::{Ereignis, SessionState, Zustandsautomat};

// ---------------------------------------------------------------------------
// Konfiguration und Kontext
// ---------------------------------------------------------------------------

/// Einstellungen einer einzelnen Session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ohne empfangenen Frame wird die Session nach dieser Zeit geschlossen
    pub idle_timeout: Duration,
    /// Maximale Payload-Groesse eines Frames
    pub max_frame_bytes: usize,
    /// PBKDF2-Iterationen fuer den Session-Schluessel
    pub kdf_iterationen: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
            kdf_iterationen: DEFAULT_ITERATIONS,
        }
    }
}

/// Was alle Sessions eines Servers gemeinsam nutzen
pub struct SessionKontext {
    pub credentials: Arc<CredentialStore>,
    pub handler: Arc<dyn DataHandler>,
    pub config: SessionConfig,
    pub metriken: TunnelMetrics,
}

impl SessionKontext {
    /// Kontext mit `EchoHandler`
    pub fn neu(credentials: Arc<CredentialStore>, config: SessionConfig, metriken: TunnelMetrics) -> Self {
        Self {
            credentials,
            handler: Arc::new(EchoHandler),
            config,
            metriken,
        }
    }

    pub fn mit_handler(mut self, handler: impl DataHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }
}

/// Ergebnis einer beendeten Session
#[derive(Debug)]
pub struct SessionEnde {
    /// `Closed` oder `Faulted`
    pub zustand: SessionState,
    pub username: Option<String>,
    /// Ausloesender Fehler (auch bei abgelehnter Anmeldung und Idle-Timeout)
    pub fehler: Option<SessionError>,
}

impl SessionEnde {
    pub fn ist_fehlerhaft(&self) -> bool {
        self.zustand == SessionState::Faulted
    }
}

// ---------------------------------------------------------------------------
// Eingang
// ---------------------------------------------------------------------------

enum Beendigung {
    /// Peer hat den Stream geschlossen
    Ende,
    /// Registry hat zum Schliessen aufgefordert
    Shutdown,
    /// Idle-Fenster abgelaufen
    Timeout,
}

enum Eingang {
    Frame(Frame),
    Beendet(Beendigung),
}

// ---------------------------------------------------------------------------
// ServerSession
// ---------------------------------------------------------------------------

pub struct ServerSession {
    kontext: Arc<SessionKontext>,
    guard: SessionGuard,
    peer: SocketAddr,
    automat: Zustandsautomat,
    username: Option<String>,
}

impl ServerSession {
    pub fn neu(kontext: Arc<SessionKontext>, guard: SessionGuard, peer: SocketAddr) -> Self {
        Self {
            kontext,
            guard,
            peer,
            automat: Zustandsautomat::neu(),
            username: None,
        }
    }

    pub fn zustand(&self) -> SessionState {
        self.automat.zustand()
    }

    /// Treibt die Session bis zum Ende
    ///
    /// Der Stream wird vor der Rueckkehr freigegeben. Danach verschwindet
    /// die Session aus der Registry.
    pub async fn verarbeiten<S>(mut self, stream: S) -> SessionEnde
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut shutdown_rx = self.guard.shutdown_signal();
        let mut framed = Framed::new(
            stream,
            FrameCodec::with_max_size(self.kontext.config.max_frame_bytes),
        );

        let ergebnis = self.ablauf(&mut framed, &mut shutdown_rx).await;
        drop(framed);

        if let Err(ref fehler) = ergebnis {
            if self.automat.zustand() != SessionState::Closed {
                let _ = self.automat.uebergang(Ereignis::Fehler);
                self.guard.zustand_setzen(self.automat.zustand());
                self.kontext.metriken.session_faults_total.inc();
                tracing::warn!(
                    session_id = %self.guard.id(),
                    peer = %self.peer,
                    fehler = %fehler,
                    "Session fehlerhaft beendet"
                );
            }
        }

        SessionEnde {
            zustand: self.automat.zustand(),
            username: self.username.take(),
            fehler: ergebnis.err(),
        }
    }

    async fn ablauf<S>(
        &mut self,
        framed: &mut Framed<S, FrameCodec>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // --- Handshake (unverschluesselt) ---
        let frame = match self.empfangen(framed, shutdown_rx).await? {
            Eingang::Frame(frame) if frame.kind == MessageKind::Handshake => frame,
            Eingang::Frame(frame) => return Err(self.automat.unerwartet(frame.kind)),
            Eingang::Beendet(b) => return self.beenden(framed, b, None).await,
        };

        let handshake = match HandshakeRequest::from_bytes(&frame.payload) {
            Ok(handshake) => handshake,
            Err(fehler @ ProtocolError::UnsupportedVersion { .. }) => {
                let antwort = HandshakeResponse::version_abgelehnt().to_bytes();
                let _ = framed
                    .send(Frame::neu(MessageKind::Handshake, antwort.to_vec()))
                    .await;
                return Err(fehler.into());
            }
            Err(fehler) => return Err(fehler.into()),
        };

        let antwort = HandshakeResponse::ok().to_bytes();
        framed
            .send(Frame::neu(MessageKind::Handshake, antwort.to_vec()))
            .await?;
        self.uebergang(Ereignis::HandshakeAbgeschlossen)?;

        let key = self.schluessel_ableiten(&handshake).await?;

        // --- Anmeldung (genau ein Versuch) ---
        let frame = match self.empfangen(framed, shutdown_rx).await? {
            Eingang::Frame(frame) if frame.kind == MessageKind::Auth => frame,
            Eingang::Frame(frame) => return Err(self.automat.unerwartet(frame.kind)),
            Eingang::Beendet(b) => return self.beenden(framed, b, Some(&key)).await,
        };

        let username = handshake.username;
        if !self.anmeldung_pruefen(&key, &username, &frame)? {
            self.kontext.metriken.auth_failures_total.inc();
            tracing::warn!(peer = %self.peer, username = %username, "Anmeldung abgelehnt");

            let antwort = AuthResponse::abgelehnt("Ungueltige Anmeldedaten").to_json()?;
            let abgelehnt = frame_versiegeln(&key, MessageKind::Auth, &antwort)?;
            let _ = framed.send(abgelehnt).await;

            self.uebergang(Ereignis::AuthAbgelehnt)?;
            self.uebergang(Ereignis::Geschlossen)?;
            return Err(AuthError::InvalidCredentials.into());
        }

        let antwort = AuthResponse::akzeptiert().to_json()?;
        framed
            .send(frame_versiegeln(&key, MessageKind::Auth, &antwort)?)
            .await?;
        self.uebergang(Ereignis::AuthAkzeptiert)?;
        self.guard.username_setzen(&username);
        self.username = Some(username.clone());

        tracing::info!(
            session_id = %self.guard.id(),
            peer = %self.peer,
            username = %username,
            "Session aufgebaut"
        );

        // --- Datenaustausch ---
        loop {
            let frame = match self.empfangen(framed, shutdown_rx).await? {
                Eingang::Frame(frame) => frame,
                Eingang::Beendet(b) => return self.beenden(framed, b, Some(&key)).await,
            };

            match frame.kind {
                MessageKind::Data => {
                    let klartext = frame_oeffnen(&key, &frame)?;
                    self.uebergang(Ereignis::Daten)?;
                    if let Some(antwort) = self.kontext.handler.verarbeiten(&username, klartext) {
                        framed
                            .send(frame_versiegeln(&key, MessageKind::Data, &antwort)?)
                            .await?;
                    }
                }
                MessageKind::KeepAlive => {
                    frame_oeffnen(&key, &frame)?;
                    self.uebergang(Ereignis::KeepAlive)?;
                    framed
                        .send(frame_versiegeln(&key, MessageKind::KeepAlive, &[])?)
                        .await?;
                }
                MessageKind::Disconnect => {
                    let grund = frame_oeffnen(&key, &frame)?;
                    self.uebergang(Ereignis::Disconnect)?;
                    tracing::info!(
                        peer = %self.peer,
                        username = %username,
                        grund = %String::from_utf8_lossy(&grund),
                        "Disconnect vom Client"
                    );
                    disconnect_senden(framed, Some(&key), "Disconnect bestaetigt").await;
                    self.uebergang(Ereignis::Geschlossen)?;
                    return Ok(());
                }
                andere => return Err(self.automat.unerwartet(andere)),
            }
        }
    }

    /// Wartet auf den naechsten Frame, das Idle-Fenster oder ein Shutdown-Signal
    async fn empfangen<S>(
        &self,
        framed: &mut Framed<S, FrameCodec>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionResult<Eingang>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle = self.kontext.config.idle_timeout;

        tokio::select! {
            ergebnis = tokio::time::timeout(idle, framed.next()) => match ergebnis {
                Err(_) => Ok(Eingang::Beendet(Beendigung::Timeout)),
                Ok(None) => Ok(Eingang::Beendet(Beendigung::Ende)),
                Ok(Some(Err(e))) => Err(e.into()),
                Ok(Some(Ok(frame))) => {
                    self.guard.aktivitaet_melden();
                    self.kontext.metriken.frame_empfangen(&frame.kind.to_string());
                    tracing::trace!(peer = %self.peer, kind = %frame.kind, laenge = frame.length(), "Frame empfangen");
                    Ok(Eingang::Frame(frame))
                }
            },
            Ok(()) = async { shutdown_rx.wait_for(|v| *v).await.map(drop) } => {
                Ok(Eingang::Beendet(Beendigung::Shutdown))
            }
        }
    }

    /// Beendet die Session ohne eingehenden Frame
    async fn beenden<S>(
        &mut self,
        framed: &mut Framed<S, FrameCodec>,
        beendigung: Beendigung,
        key: Option<&SessionKey>,
    ) -> SessionResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match beendigung {
            Beendigung::Ende if self.automat.zustand() == SessionState::Established => {
                self.uebergang(Ereignis::Disconnect)?;
                self.uebergang(Ereignis::Geschlossen)?;
                tracing::info!(peer = %self.peer, "Verbindung vom Client getrennt");
                Ok(())
            }
            Beendigung::Ende => Err(TransportError::ConnectionReset.into()),
            Beendigung::Shutdown => {
                self.uebergang(Ereignis::Schliessen)?;
                disconnect_senden(framed, key, "Session vom Server beendet").await;
                self.uebergang(Ereignis::Geschlossen)?;
                tracing::info!(peer = %self.peer, "Session auf Anforderung geschlossen");
                Ok(())
            }
            Beendigung::Timeout => {
                self.uebergang(Ereignis::Timeout)?;
                disconnect_senden(framed, key, "Idle-Timeout").await;
                self.uebergang(Ereignis::Geschlossen)?;
                tracing::info!(
                    peer = %self.peer,
                    idle_sek = self.kontext.config.idle_timeout.as_secs(),
                    "Idle-Timeout"
                );
                Err(SessionError::Timeout)
            }
        }
    }

    /// Leitet den Session-Schluessel aus dem gespeicherten Geheimnis ab
    ///
    /// Laeuft im Blocking-Pool. Unbekannte Benutzer bekommen ein zufaelliges
    /// Geheimnis, damit sie denselben Pfad und dieselben Kosten haben wie
    /// ein falsches Passwort.
    async fn schluessel_ableiten(&self, handshake: &HandshakeRequest) -> SessionResult<SessionKey> {
        let secret: Zeroizing<Vec<u8>> = match self.kontext.credentials.secret(&handshake.username) {
            Some(secret) => Zeroizing::new(secret.into_bytes()),
            None => Zeroizing::new(generate_salt::<32>().to_vec()),
        };
        let salt = handshake.salt;
        let iterationen = self.kontext.config.kdf_iterationen;

        let key = tokio::task::spawn_blocking(move || derive_key(&secret, &salt, iterationen))
            .await
            .map_err(|e| SessionError::intern(format!("KDF-Task abgebrochen: {e}")))??;
        Ok(key)
    }

    /// Prueft den Auth-Frame
    ///
    /// Laesst sich der Frame nicht oeffnen, hat der Client einen anderen
    /// Schluessel abgeleitet: das Passwort ist falsch.
    fn anmeldung_pruefen(&self, key: &SessionKey, username: &str, frame: &Frame) -> SessionResult<bool> {
        let klartext = match frame_oeffnen(key, frame) {
            Ok(klartext) => Zeroizing::new(klartext),
            Err(SessionError::Crypto(CryptoError::AuthenticationFailed)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let anfrage = AuthRequest::from_json(&klartext)?;

        if anfrage.username != username {
            tracing::debug!(peer = %self.peer, "Benutzername weicht vom Handshake ab");
            return Ok(false);
        }
        match self.kontext.credentials.pruefen(&anfrage.username, &anfrage.password) {
            Ok(()) => Ok(true),
            Err(AuthError::InvalidCredentials) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn uebergang(&mut self, ereignis: Ereignis) -> SessionResult<SessionState> {
        let ergebnis = self.automat.uebergang(ereignis);
        self.guard.zustand_setzen(self.automat.zustand());
        ergebnis
    }
}

/// Sendet einen Disconnect, Fehler werden ignoriert (Peer evtl. schon weg)
async fn disconnect_senden<S>(framed: &mut Framed<S, FrameCodec>, key: Option<&SessionKey>, grund: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Ohne Schluessel wird nie ein Disconnect gesendet
    let Some(key) = key else {
        return;
    };
    match frame_versiegeln(key, MessageKind::Disconnect, grund.as_bytes()) {
        Ok(frame) => {
            if let Err(e) = framed.send(frame).await {
                tracing::debug!(fehler = %e, "Disconnect konnte nicht gesendet werden");
            }
        }
        Err(e) => tracing::debug!(fehler = %e, "Disconnect konnte nicht versiegelt werden"),
    }
}
