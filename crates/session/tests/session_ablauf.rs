//! Integrationstests fuer die serverseitige Session ueber In-Memory-Streams

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fosen_auth::{AuthError, CredentialStore};
use fosen_crypto::{derive_key, generate_salt, CryptoError, SessionKey, DEFAULT_ITERATIONS};
use fosen_observability::TunnelMetrics;
use fosen_protocol::{
    AuthRequest, AuthResponse, Frame, FrameCodec, HandshakeRequest, HandshakeResponse, HandshakeStatus,
    MessageKind, ProtocolError, SALT_LEN,
};
use fosen_session::{
    frame_oeffnen, frame_versiegeln, DataHandler, EchoHandler, ServerSession, SessionConfig, SessionEnde,
    SessionError, SessionKontext, SessionRegistry, SessionState,
};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

fn peer() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

fn store() -> Arc<CredentialStore> {
    let store = CredentialStore::neu();
    store.add_user("alice", "secret123").unwrap();
    Arc::new(store)
}

struct Umgebung {
    kontext: Arc<SessionKontext>,
    registry: Arc<SessionRegistry>,
    metriken: TunnelMetrics,
}

fn umgebung_mit(idle: Duration, handler: impl DataHandler) -> Umgebung {
    let metriken = TunnelMetrics::neu().unwrap();
    let config = SessionConfig {
        idle_timeout: idle,
        ..SessionConfig::default()
    };
    let kontext = SessionKontext::neu(store(), config, metriken.clone()).mit_handler(handler);
    Umgebung {
        kontext: Arc::new(kontext),
        registry: SessionRegistry::neu(8, metriken.clone()),
        metriken,
    }
}

fn umgebung() -> Umgebung {
    umgebung_mit(Duration::from_secs(10), EchoHandler)
}

fn session_starten(u: &Umgebung) -> (Framed<DuplexStream, FrameCodec>, JoinHandle<SessionEnde>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let guard = u.registry.reservieren(peer()).unwrap();
    let session = ServerSession::neu(Arc::clone(&u.kontext), guard, peer());
    let handle = tokio::spawn(session.verarbeiten(server));
    (Framed::new(client, FrameCodec::new()), handle)
}

async fn naechster_frame(framed: &mut Framed<DuplexStream, FrameCodec>) -> Frame {
    tokio::time::timeout(Duration::from_secs(10), framed.next())
        .await
        .expect("Timeout beim Warten auf Frame")
        .expect("Stream beendet")
        .expect("Frame-Fehler")
}

/// Fuehrt den Handshake aus und leitet den Client-Schluessel ab
async fn handshake(framed: &mut Framed<DuplexStream, FrameCodec>, username: &str, password: &str) -> SessionKey {
    let salt: [u8; SALT_LEN] = generate_salt();
    let request = HandshakeRequest::neu(salt, username);
    framed
        .send(Frame::neu(MessageKind::Handshake, request.to_bytes().unwrap()))
        .await
        .unwrap();

    let antwort = naechster_frame(framed).await;
    assert_eq!(antwort.kind, MessageKind::Handshake);
    let antwort = HandshakeResponse::from_bytes(&antwort.payload).unwrap();
    assert_eq!(antwort.status, HandshakeStatus::Ok);

    derive_key(password.as_bytes(), &salt, DEFAULT_ITERATIONS).unwrap()
}

async fn auth_senden(framed: &mut Framed<DuplexStream, FrameCodec>, key: &SessionKey, username: &str, password: &str) {
    let json = AuthRequest::neu(username, password).to_json().unwrap();
    framed
        .send(frame_versiegeln(key, MessageKind::Auth, &json).unwrap())
        .await
        .unwrap();
}

/// Handshake + erfolgreiche Anmeldung als alice
async fn anmelden(framed: &mut Framed<DuplexStream, FrameCodec>) -> SessionKey {
    let key = handshake(framed, "alice", "secret123").await;
    auth_senden(framed, &key, "alice", "secret123").await;

    let antwort = naechster_frame(framed).await;
    assert_eq!(antwort.kind, MessageKind::Auth);
    let antwort = AuthResponse::from_json(&frame_oeffnen(&key, &antwort).unwrap()).unwrap();
    assert!(antwort.ist_akzeptiert());
    key
}

async fn ende_abwarten(handle: JoinHandle<SessionEnde>) -> SessionEnde {
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("Session endet nicht")
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn erfolgreiche_session_mit_echo_und_keepalive() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);
    let key = anmelden(&mut framed).await;

    let sessions = u.registry.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].zustand, SessionState::Established);
    assert_eq!(sessions[0].username.as_deref(), Some("alice"));

    framed
        .send(frame_versiegeln(&key, MessageKind::Data, b"ping").unwrap())
        .await
        .unwrap();
    let echo = naechster_frame(&mut framed).await;
    assert_eq!(echo.kind, MessageKind::Data);
    assert_eq!(frame_oeffnen(&key, &echo).unwrap(), b"ping");

    framed
        .send(frame_versiegeln(&key, MessageKind::KeepAlive, b"").unwrap())
        .await
        .unwrap();
    let keepalive = naechster_frame(&mut framed).await;
    assert_eq!(keepalive.kind, MessageKind::KeepAlive);
    assert!(frame_oeffnen(&key, &keepalive).unwrap().is_empty());

    framed
        .send(frame_versiegeln(&key, MessageKind::Disconnect, b"tschuess").unwrap())
        .await
        .unwrap();

    // Server bestaetigt mit eigenem, versiegeltem Disconnect
    let bestaetigung = naechster_frame(&mut framed).await;
    assert_eq!(bestaetigung.kind, MessageKind::Disconnect);
    assert_eq!(frame_oeffnen(&key, &bestaetigung).unwrap(), b"Disconnect bestaetigt");
    assert!(framed.next().await.is_none());

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Closed);
    assert!(ende.fehler.is_none());
    assert_eq!(ende.username.as_deref(), Some("alice"));
    assert_eq!(u.registry.anzahl(), 0);
    assert_eq!(u.metriken.sessions_active.get(), 0);
}

#[tokio::test]
async fn falsches_passwort_wird_versiegelt_abgelehnt() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);

    let key = handshake(&mut framed, "alice", "falsch").await;
    auth_senden(&mut framed, &key, "alice", "falsch").await;

    // Server versiegelt mit seinem Schluessel, der Client kann nicht oeffnen
    let antwort = naechster_frame(&mut framed).await;
    assert_eq!(antwort.kind, MessageKind::Auth);
    assert!(matches!(
        frame_oeffnen(&key, &antwort),
        Err(SessionError::Crypto(CryptoError::AuthenticationFailed))
    ));

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Closed);
    assert!(matches!(
        ende.fehler,
        Some(SessionError::Auth(AuthError::InvalidCredentials))
    ));
    assert_eq!(u.metriken.auth_failures_total.get(), 1);
    assert_eq!(u.registry.anzahl(), 0);

    // Ein zweiter Versuch wird nie gelesen: die Verbindung ist zu
    let _ = framed
        .send(frame_versiegeln(&key, MessageKind::Auth, b"{}").unwrap())
        .await;
    assert!(framed.next().await.is_none());
}

#[tokio::test]
async fn abweichender_benutzername_im_auth_wird_abgelehnt() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);

    // Schluessel stimmt (alice), aber die Anmeldung nennt einen anderen Namen
    let key = handshake(&mut framed, "alice", "secret123").await;
    auth_senden(&mut framed, &key, "bob", "secret123").await;

    let antwort = naechster_frame(&mut framed).await;
    let antwort = AuthResponse::from_json(&frame_oeffnen(&key, &antwort).unwrap()).unwrap();
    assert!(!antwort.ist_akzeptiert());
    assert!(antwort.message.is_some());

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Closed);
    assert!(ende.username.is_none());
}

#[tokio::test]
async fn unbekannter_benutzer_wird_abgelehnt() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);

    let key = handshake(&mut framed, "mallory", "secret123").await;
    auth_senden(&mut framed, &key, "mallory", "secret123").await;
    let antwort = naechster_frame(&mut framed).await;
    assert!(frame_oeffnen(&key, &antwort).is_err());

    let ende = ende_abwarten(handle).await;
    assert!(matches!(
        ende.fehler,
        Some(SessionError::Auth(AuthError::InvalidCredentials))
    ));
}

#[tokio::test]
async fn daten_vor_auth_fuehrt_zu_faulted() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);

    let key = handshake(&mut framed, "alice", "secret123").await;
    framed
        .send(frame_versiegeln(&key, MessageKind::Data, b"zu frueh").unwrap())
        .await
        .unwrap();

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Faulted);
    assert!(matches!(
        ende.fehler,
        Some(SessionError::UngueltigerUebergang {
            zustand: SessionState::Authenticating,
            ..
        })
    ));
    assert_eq!(u.metriken.session_faults_total.get(), 1);
    // Kein Echo, die Verbindung ist geschlossen
    assert!(framed.next().await.is_none());
}

#[tokio::test]
async fn daten_vor_handshake_fuehrt_zu_faulted() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);

    framed
        .send(Frame::neu(MessageKind::Data, vec![0u8; 40]))
        .await
        .unwrap();

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Faulted);
    assert!(matches!(
        ende.fehler,
        Some(SessionError::UngueltigerUebergang {
            zustand: SessionState::Connected,
            ..
        })
    ));
}

#[tokio::test]
async fn fremde_protokollversion_wird_abgelehnt() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);

    let mut payload = HandshakeRequest::neu([0u8; SALT_LEN], "alice").to_bytes().unwrap();
    payload[0] = 9;
    framed
        .send(Frame::neu(MessageKind::Handshake, payload))
        .await
        .unwrap();

    let antwort = naechster_frame(&mut framed).await;
    let antwort = HandshakeResponse::from_bytes(&antwort.payload).unwrap();
    assert_eq!(antwort.status, HandshakeStatus::VersionAbgelehnt);

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Faulted);
    assert!(matches!(
        ende.fehler,
        Some(SessionError::Protocol(ProtocolError::UnsupportedVersion {
            erwartet: 1,
            erhalten: 9
        }))
    ));
}

#[tokio::test]
async fn falsche_magic_bytes_fuehren_zu_faulted() {
    let u = umgebung();
    let (client, server) = tokio::io::duplex(1024);
    let guard = u.registry.reservieren(peer()).unwrap();
    let handle = tokio::spawn(ServerSession::neu(Arc::clone(&u.kontext), guard, peer()).verarbeiten(server));

    let mut client = client;
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Faulted);
    assert!(matches!(
        ende.fehler,
        Some(SessionError::Protocol(ProtocolError::BadMagic))
    ));
}

#[tokio::test]
async fn manipulierter_datenframe_beendet_session() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);
    let key = anmelden(&mut framed).await;

    let frame = frame_versiegeln(&key, MessageKind::Data, b"ping").unwrap();
    let mut payload = frame.payload.to_vec();
    payload[20] ^= 0x40;
    framed
        .send(Frame::neu(MessageKind::Data, payload))
        .await
        .unwrap();

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Faulted);
    assert!(matches!(
        ende.fehler,
        Some(SessionError::Crypto(CryptoError::AuthenticationFailed))
    ));
}

#[tokio::test]
async fn idle_timeout_schliesst_session() {
    let u = umgebung_mit(Duration::from_secs(1), EchoHandler);
    let (mut framed, handle) = session_starten(&u);
    let key = anmelden(&mut framed).await;

    // Keine Frames mehr: Server schickt Disconnect und schliesst
    let frame = naechster_frame(&mut framed).await;
    assert_eq!(frame.kind, MessageKind::Disconnect);
    assert_eq!(frame_oeffnen(&key, &frame).unwrap(), b"Idle-Timeout");

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Closed);
    assert!(matches!(ende.fehler, Some(SessionError::Timeout)));
    assert!(framed.next().await.is_none());
}

#[tokio::test]
async fn keepalive_haelt_session_offen() {
    let u = umgebung_mit(Duration::from_millis(1500), EchoHandler);
    let (mut framed, handle) = session_starten(&u);
    let key = anmelden(&mut framed).await;
    let angemeldet = u.registry.sessions()[0].letzte_aktivitaet;

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        framed
            .send(frame_versiegeln(&key, MessageKind::KeepAlive, b"").unwrap())
            .await
            .unwrap();
        assert_eq!(naechster_frame(&mut framed).await.kind, MessageKind::KeepAlive);
    }
    let sessions = u.registry.sessions();
    assert_eq!(sessions[0].zustand, SessionState::Established);
    assert!(sessions[0].letzte_aktivitaet > angemeldet);

    framed
        .send(frame_versiegeln(&key, MessageKind::Disconnect, b"").unwrap())
        .await
        .unwrap();
    let ende = ende_abwarten(handle).await;
    assert!(ende.fehler.is_none());
}

#[tokio::test]
async fn trennen_ueber_registry_bricht_lesen_ab() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);
    let key = anmelden(&mut framed).await;

    let id = u.registry.sessions()[0].id;
    assert!(u.registry.trennen(id));

    let frame = naechster_frame(&mut framed).await;
    assert_eq!(frame.kind, MessageKind::Disconnect);
    assert!(frame_oeffnen(&key, &frame).is_ok());

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Closed);
    assert!(ende.fehler.is_none());
    assert_eq!(u.registry.anzahl(), 0);
}

#[tokio::test]
async fn verbindungsabbruch_nach_auth_ist_kein_fehler() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);
    anmelden(&mut framed).await;
    drop(framed);

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Closed);
    assert!(ende.fehler.is_none());
}

#[tokio::test]
async fn verbindungsabbruch_vor_auth_ist_fehler() {
    let u = umgebung();
    let (mut framed, handle) = session_starten(&u);
    handshake(&mut framed, "alice", "secret123").await;
    drop(framed);

    let ende = ende_abwarten(handle).await;
    assert_eq!(ende.zustand, SessionState::Faulted);
    assert!(matches!(ende.fehler, Some(SessionError::Transport(_))));
}

/// Beantwortet nur Payloads die mit `?` enden
struct FrageHandler;

impl DataHandler for FrageHandler {
    fn verarbeiten(&self, _username: &str, payload: Vec<u8>) -> Option<Vec<u8>> {
        payload.ends_with(b"?").then(|| b"42".to_vec())
    }
}

#[tokio::test]
async fn eigener_handler_ohne_antwort() {
    let u = umgebung_mit(Duration::from_secs(10), FrageHandler);
    let (mut framed, handle) = session_starten(&u);
    let key = anmelden(&mut framed).await;

    framed
        .send(frame_versiegeln(&key, MessageKind::Data, b"hallo").unwrap())
        .await
        .unwrap();
    framed
        .send(frame_versiegeln(&key, MessageKind::Data, b"antwort?").unwrap())
        .await
        .unwrap();

    // Der erste Payload bekommt keine Antwort
    let frame = naechster_frame(&mut framed).await;
    assert_eq!(frame_oeffnen(&key, &frame).unwrap(), b"42");

    drop(framed);
    ende_abwarten(handle).await;
}
