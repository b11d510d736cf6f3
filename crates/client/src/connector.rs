//! Verbindungsaufbau zum Fosen-Server
//!
//! TCP-Connect, Handshake und Anmeldung laufen unter einer gemeinsamen
//! Zeitgrenze (`connect_timeout`). Erst nach akzeptierter Anmeldung wird
//! eine [`ClientSession`] zurueckgegeben.

use fosen_crypto::{derive_key, generate_salt, CryptoError, SessionKey};
use fosen_protocol::{
    AuthRequest, AuthResponse, Frame, FrameCodec, HandshakeRequest, HandshakeResponse,
    HandshakeStatus, MessageKind, ProtocolError, PROTOCOL_VERSION, SALT_LEN,
};
use fosen_session::{frame_oeffnen, frame_versiegeln, Ereignis, SessionError, Zustandsautomat};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use zeroize::Zeroizing;

use crate::config::ClientConfig;
use crate::error::ConnectError;
use crate::session::ClientSession;

/// Baut Client-Sessions auf
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientConnector;

impl ClientConnector {
    /// Verbindet, fuehrt den Handshake durch und meldet sich an
    pub async fn connect(config: ClientConfig) -> Result<ClientSession, ConnectError> {
        let adresse = config.adresse();
        tracing::info!(adresse = %adresse, username = %config.username, "Verbinde mit Server");

        match tokio::time::timeout(config.connect_timeout, aufbauen(&config)).await {
            Ok(Ok((framed, key, automat))) => {
                tracing::info!(adresse = %adresse, "Session aufgebaut");
                Ok(ClientSession::starten(
                    framed,
                    key,
                    automat,
                    config.keepalive_intervall,
                    config.idle_timeout,
                ))
            }
            Ok(Err(fehler)) => {
                tracing::warn!(adresse = %adresse, fehler = %fehler, "Verbindungsaufbau fehlgeschlagen");
                Err(fehler)
            }
            Err(_) => {
                tracing::warn!(
                    adresse = %adresse,
                    timeout_ms = config.connect_timeout.as_millis() as u64,
                    "Zeitueberschreitung beim Verbindungsaufbau"
                );
                Err(ConnectError::Timeout)
            }
        }
    }
}

type Aufgebaut = (Framed<TcpStream, FrameCodec>, SessionKey, Zustandsautomat);

async fn aufbauen(config: &ClientConfig) -> Result<Aufgebaut, ConnectError> {
    let stream = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(|e| ConnectError::ConnectionRefused(e.to_string()))?;
    let _ = stream.set_nodelay(true);

    let mut framed = Framed::new(stream, FrameCodec::with_max_size(config.max_frame_bytes));
    let mut automat = Zustandsautomat::neu();

    // --- Handshake (unverschluesselt) ---
    let salt = generate_salt::<SALT_LEN>();
    let anfrage = HandshakeRequest::neu(salt, config.username.clone())
        .to_bytes()
        .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?;
    framed
        .send(Frame::neu(MessageKind::Handshake, anfrage))
        .await
        .map_err(sendefehler)?;

    let frame = naechster_frame(&mut framed).await?;
    if frame.kind != MessageKind::Handshake {
        return Err(ConnectError::HandshakeFailed(format!(
            "Handshake erwartet, {} erhalten",
            frame.kind
        )));
    }
    let antwort = HandshakeResponse::from_bytes(&frame.payload)
        .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?;
    if antwort.status == HandshakeStatus::VersionAbgelehnt || antwort.version != PROTOCOL_VERSION {
        return Err(ConnectError::HandshakeFailed(format!(
            "Protokollversion abgelehnt (Client {PROTOCOL_VERSION}, Server {})",
            antwort.version
        )));
    }
    automat
        .uebergang(Ereignis::HandshakeAbgeschlossen)
        .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?;

    let key = schluessel_ableiten(config, salt).await?;

    // --- Anmeldung ---
    let anfrage = Zeroizing::new(
        AuthRequest::neu(config.username.clone(), config.password.clone())
            .to_json()
            .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?,
    );
    let frame = frame_versiegeln(&key, MessageKind::Auth, &anfrage)
        .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?;
    framed.send(frame).await.map_err(sendefehler)?;

    let frame = naechster_frame(&mut framed).await?;
    if frame.kind != MessageKind::Auth {
        return Err(ConnectError::HandshakeFailed(format!(
            "Auth-Antwort erwartet, {} erhalten",
            frame.kind
        )));
    }

    // Eine nicht oeffenbare Antwort heisst: der Server hat mit dem
    // gespeicherten Geheimnis einen anderen Schluessel abgeleitet
    let klartext = match frame_oeffnen(&key, &frame) {
        Ok(klartext) => klartext,
        Err(SessionError::Crypto(CryptoError::AuthenticationFailed)) => {
            let _ = automat.uebergang(Ereignis::AuthAbgelehnt);
            return Err(ConnectError::AuthRejected);
        }
        Err(e) => return Err(ConnectError::HandshakeFailed(e.to_string())),
    };
    let antwort = AuthResponse::from_json(&klartext)
        .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?;
    if !antwort.ist_akzeptiert() {
        tracing::debug!(grund = ?antwort.message, "Server hat die Anmeldung abgelehnt");
        let _ = automat.uebergang(Ereignis::AuthAbgelehnt);
        return Err(ConnectError::AuthRejected);
    }
    automat
        .uebergang(Ereignis::AuthAkzeptiert)
        .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?;

    Ok((framed, key, automat))
}

/// Liest den naechsten Frame waehrend des Aufbaus
///
/// Schliesst der Server die Verbindung bevor er antwortet, gilt das als
/// abgelehnte Verbindung (z.B. Server voll).
async fn naechster_frame(framed: &mut Framed<TcpStream, FrameCodec>) -> Result<Frame, ConnectError> {
    match framed.next().await {
        Some(Ok(frame)) => Ok(frame),
        Some(Err(ProtocolError::Io(e))) => Err(ConnectError::ConnectionRefused(e.to_string())),
        Some(Err(e)) => Err(ConnectError::HandshakeFailed(e.to_string())),
        None => Err(ConnectError::ConnectionRefused(
            "Server hat die Verbindung geschlossen".to_string(),
        )),
    }
}

fn sendefehler(fehler: ProtocolError) -> ConnectError {
    match fehler {
        ProtocolError::Io(e) => ConnectError::ConnectionRefused(e.to_string()),
        andere => ConnectError::HandshakeFailed(andere.to_string()),
    }
}

async fn schluessel_ableiten(config: &ClientConfig, salt: [u8; SALT_LEN]) -> Result<SessionKey, ConnectError> {
    let passwort = Zeroizing::new(config.password.clone().into_bytes());
    let iterationen = config.kdf_iterationen;

    tokio::task::spawn_blocking(move || derive_key(&passwort, &salt, iterationen))
        .await
        .map_err(|e| ConnectError::HandshakeFailed(format!("KDF-Task abgebrochen: {e}")))?
        .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))
}
