//! Ende-zu-Ende-Tests ueber Loopback-TCP
//!
//! Jeder Test startet einen eigenen `TunnelServer` auf einem freien Port.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fosen_auth::CredentialStore;
use fosen_client::{ClientConfig, ClientConnector, ClientError, ConnectError};
use fosen_crypto::{derive_key, CryptoError, SessionKey, DEFAULT_ITERATIONS};
use fosen_observability::TunnelMetrics;
use fosen_protocol::{AuthResponse, Frame, FrameCodec, HandshakeRequest, HandshakeResponse, MessageKind};
use fosen_session::{
    frame_oeffnen, frame_versiegeln, SessionConfig, SessionError, SessionKontext, SessionRegistry, SessionState,
    TunnelServer,
};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio_util::codec::Framed;

struct Server {
    adresse: SocketAddr,
    registry: Arc<SessionRegistry>,
    metriken: TunnelMetrics,
    shutdown_tx: watch::Sender<bool>,
}

async fn server_starten(max_sessions: usize) -> Server {
    let store = CredentialStore::neu();
    store.add_user("alice", "secret123").unwrap();
    store.add_user("bob", "hunter2").unwrap();

    let metriken = TunnelMetrics::neu().unwrap();
    let kontext = SessionKontext::neu(Arc::new(store), SessionConfig::default(), metriken.clone());
    let server = TunnelServer::binden("127.0.0.1:0", kontext, max_sessions)
        .await
        .unwrap();
    let adresse = server.lokale_adresse().unwrap();
    let registry = server.registry();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.starten(shutdown_rx));

    Server {
        adresse,
        registry,
        metriken,
        shutdown_tx,
    }
}

fn config(adresse: SocketAddr, username: &str, password: &str) -> ClientConfig {
    ClientConfig::neu(adresse.ip().to_string(), adresse.port(), username, password)
}

/// Wartet bis die Registry die erwartete Anzahl Sessions fuehrt
async fn anzahl_abwarten(registry: &SessionRegistry, erwartet: usize) {
    for _ in 0..250 {
        if registry.anzahl() == erwartet {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Registry: erwartet {erwartet}, aktuell {}", registry.anzahl());
}

async fn zustand_abwarten(mut beobachter: watch::Receiver<SessionState>, ziel: SessionState) {
    tokio::time::timeout(Duration::from_secs(5), beobachter.wait_for(|z| *z == ziel))
        .await
        .expect("Zustand nicht erreicht")
        .unwrap();
}

/// Gegenstelle ohne `TunnelServer`
///
/// Nimmt eine Verbindung an, fuehrt Handshake und Anmeldung fuer alice
/// (`secret123`) von Hand durch und uebergibt danach Stream und Schluessel
/// an `danach`.
async fn handgebauter_server<F, Fut>(danach: F) -> SocketAddr
where
    F: FnOnce(Framed<TcpStream, FrameCodec>, SessionKey) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());

        let frame = framed.next().await.unwrap().unwrap();
        assert_eq!(frame.kind, MessageKind::Handshake);
        let anfrage = HandshakeRequest::from_bytes(&frame.payload).unwrap();
        let antwort = HandshakeResponse::ok().to_bytes();
        framed
            .send(Frame::neu(MessageKind::Handshake, antwort.to_vec()))
            .await
            .unwrap();

        let key = derive_key(b"secret123", &anfrage.salt, DEFAULT_ITERATIONS).unwrap();
        let auth = framed.next().await.unwrap().unwrap();
        assert_eq!(auth.kind, MessageKind::Auth);
        frame_oeffnen(&key, &auth).unwrap();
        let json = AuthResponse::akzeptiert().to_json().unwrap();
        framed
            .send(frame_versiegeln(&key, MessageKind::Auth, &json).unwrap())
            .await
            .unwrap();

        danach(framed, key).await;
    });
    adresse
}

#[tokio::test]
async fn echo_ueber_loopback() {
    let server = server_starten(8).await;

    let mut session = ClientConnector::connect(config(server.adresse, "alice", "secret123"))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Established);

    session.send(b"ping".to_vec()).await.unwrap();
    assert_eq!(session.receive().await.unwrap(), b"ping");

    session.send(vec![0u8; 64 * 1024]).await.unwrap();
    assert_eq!(session.receive().await.unwrap(), vec![0u8; 64 * 1024]);

    let info = &server.registry.sessions()[0];
    assert_eq!(info.username.as_deref(), Some("alice"));
    assert_eq!(info.zustand, SessionState::Established);

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(session.send(b"x".to_vec()).await, Err(ClientError::Geschlossen)));

    anzahl_abwarten(&server.registry, 0).await;
    assert_eq!(server.metriken.session_faults_total.get(), 0);
}

#[tokio::test]
async fn falsches_passwort_wird_abgelehnt() {
    let server = server_starten(8).await;
    let vorher = server.registry.anzahl();

    let ergebnis = ClientConnector::connect(config(server.adresse, "alice", "falsch")).await;
    assert!(matches!(ergebnis, Err(ConnectError::AuthRejected)));

    anzahl_abwarten(&server.registry, vorher).await;
    assert_eq!(server.metriken.auth_failures_total.get(), 1);
}

#[tokio::test]
async fn unbekannter_benutzer_wird_abgelehnt() {
    let server = server_starten(8).await;

    let ergebnis = ClientConnector::connect(config(server.adresse, "mallory", "secret123")).await;
    assert!(matches!(ergebnis, Err(ConnectError::AuthRejected)));
    anzahl_abwarten(&server.registry, 0).await;
}

#[tokio::test]
async fn volle_registry_lehnt_verbindung_ab() {
    let server = server_starten(1).await;

    let mut erste = ClientConnector::connect(config(server.adresse, "alice", "secret123"))
        .await
        .unwrap();
    anzahl_abwarten(&server.registry, 1).await;

    let zweite = ClientConnector::connect(config(server.adresse, "bob", "hunter2")).await;
    assert!(matches!(zweite, Err(ConnectError::ConnectionRefused(_))));
    assert_eq!(server.metriken.sessions_rejected_total.get(), 1);

    // Die bestehende Session ist davon nicht betroffen
    erste.send(b"noch da".to_vec()).await.unwrap();
    assert_eq!(erste.receive().await.unwrap(), b"noch da");
    erste.close().await;
}

#[tokio::test]
async fn kein_server_gibt_connection_refused() {
    let adresse = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let ergebnis = ClientConnector::connect(config(adresse, "alice", "secret123")).await;
    assert!(matches!(ergebnis, Err(ConnectError::ConnectionRefused(_))));
}

#[tokio::test]
async fn stummer_server_gibt_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut config = config(adresse, "alice", "secret123");
    config.connect_timeout = Duration::from_millis(300);
    let ergebnis = ClientConnector::connect(config).await;
    assert!(matches!(ergebnis, Err(ConnectError::Timeout)));
}

#[tokio::test]
async fn fremdes_protokoll_gibt_handshake_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let ergebnis = ClientConnector::connect(config(adresse, "alice", "secret123")).await;
    assert!(matches!(ergebnis, Err(ConnectError::HandshakeFailed(_))));
}

#[tokio::test]
async fn trennen_durch_server_beendet_client() {
    let server = server_starten(8).await;

    let mut session = ClientConnector::connect(config(server.adresse, "alice", "secret123"))
        .await
        .unwrap();
    anzahl_abwarten(&server.registry, 1).await;

    let id = server.registry.sessions()[0].id;
    assert!(server.registry.trennen(id));

    assert!(matches!(session.receive().await, Err(ClientError::Geschlossen)));
    zustand_abwarten(session.zustand_beobachten(), SessionState::Closed).await;
    anzahl_abwarten(&server.registry, 0).await;
}

#[tokio::test]
async fn shutdown_schliesst_alle_clients() {
    let server = server_starten(8).await;

    let mut a = ClientConnector::connect(config(server.adresse, "alice", "secret123"))
        .await
        .unwrap();
    let mut b = ClientConnector::connect(config(server.adresse, "bob", "hunter2"))
        .await
        .unwrap();
    anzahl_abwarten(&server.registry, 2).await;

    server.shutdown_tx.send(true).unwrap();

    assert!(matches!(a.receive().await, Err(ClientError::Geschlossen)));
    assert!(matches!(b.receive().await, Err(ClientError::Geschlossen)));
    anzahl_abwarten(&server.registry, 0).await;
}

#[tokio::test]
async fn keepalive_haelt_session_offen() {
    let store = CredentialStore::neu();
    store.add_user("alice", "secret123").unwrap();
    let session_config = SessionConfig {
        idle_timeout: Duration::from_millis(800),
        ..SessionConfig::default()
    };
    let metriken = TunnelMetrics::neu().unwrap();
    let kontext = SessionKontext::neu(Arc::new(store), session_config, metriken);
    let server = TunnelServer::binden("127.0.0.1:0", kontext, 4).await.unwrap();
    let adresse = server.lokale_adresse().unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.starten(shutdown_rx));

    let mut config = config(adresse, "alice", "secret123");
    config.keepalive_intervall = Duration::from_millis(200);
    let mut session = ClientConnector::connect(config).await.unwrap();

    // Laenger als das Idle-Fenster, ohne Daten
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(session.state(), SessionState::Established);

    session.send(b"lebt".to_vec()).await.unwrap();
    assert_eq!(session.receive().await.unwrap(), b"lebt");
    session.close().await;
}

#[tokio::test]
async fn abgelehnte_version_gibt_handshake_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());
        let frame = framed.next().await.unwrap().unwrap();
        assert_eq!(frame.kind, MessageKind::Handshake);
        let antwort = HandshakeResponse::version_abgelehnt().to_bytes();
        framed
            .send(Frame::neu(MessageKind::Handshake, antwort.to_vec()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let ergebnis = ClientConnector::connect(config(adresse, "alice", "secret123")).await;
    assert!(matches!(ergebnis, Err(ConnectError::HandshakeFailed(_))));
}

#[tokio::test]
async fn manipulierter_datenframe_fuehrt_zu_faulted() {
    let adresse = handgebauter_server(|mut framed, key| async move {
        let frame = frame_versiegeln(&key, MessageKind::Data, b"hallo").unwrap();
        let mut payload = frame.payload.to_vec();
        *payload.last_mut().unwrap() ^= 0x01;
        framed.send(Frame::neu(MessageKind::Data, payload)).await.unwrap();
        while let Some(Ok(_)) = framed.next().await {}
    })
    .await;

    let mut session = ClientConnector::connect(config(adresse, "alice", "secret123"))
        .await
        .unwrap();

    let ergebnis = tokio::time::timeout(Duration::from_secs(5), session.receive())
        .await
        .expect("kein Fehler gemeldet");
    assert!(matches!(
        ergebnis,
        Err(ClientError::Session(SessionError::Crypto(CryptoError::AuthenticationFailed)))
    ));
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(matches!(session.send(b"x".to_vec()).await, Err(ClientError::Geschlossen)));
}

#[tokio::test]
async fn stummer_server_loest_idle_timeout_aus() {
    let (grund_tx, grund_rx) = oneshot::channel();
    let adresse = handgebauter_server(|mut framed, key| async move {
        // Liest alles, antwortet nie
        let mut grund_tx = Some(grund_tx);
        while let Some(Ok(frame)) = framed.next().await {
            if frame.kind == MessageKind::Disconnect {
                if let Some(tx) = grund_tx.take() {
                    let _ = tx.send(frame_oeffnen(&key, &frame).unwrap());
                }
            }
        }
    })
    .await;

    let mut config = config(adresse, "alice", "secret123");
    config.keepalive_intervall = Duration::from_millis(100);
    config.idle_timeout = Duration::from_millis(400);
    let mut session = ClientConnector::connect(config).await.unwrap();
    assert_eq!(session.state(), SessionState::Established);

    let ergebnis = tokio::time::timeout(Duration::from_secs(3), session.receive())
        .await
        .expect("Idle-Timeout greift nicht");
    assert!(matches!(ergebnis, Err(ClientError::Session(SessionError::Timeout))));
    assert_eq!(session.state(), SessionState::Closed);

    let grund = tokio::time::timeout(Duration::from_secs(3), grund_rx)
        .await
        .expect("kein Disconnect empfangen")
        .unwrap();
    assert_eq!(grund, b"Idle-Timeout");

    // Danach ist die Session endgueltig zu
    assert!(matches!(session.receive().await, Err(ClientError::Geschlossen)));
}

#[tokio::test]
async fn disconnect_vom_server_wird_bestaetigt() {
    let (grund_tx, grund_rx) = oneshot::channel();
    let adresse = handgebauter_server(|mut framed, key| async move {
        framed
            .send(frame_versiegeln(&key, MessageKind::Disconnect, b"Wartung").unwrap())
            .await
            .unwrap();
        while let Some(Ok(frame)) = framed.next().await {
            if frame.kind == MessageKind::Disconnect {
                let _ = grund_tx.send(frame_oeffnen(&key, &frame).unwrap());
                break;
            }
        }
    })
    .await;

    let mut session = ClientConnector::connect(config(adresse, "alice", "secret123"))
        .await
        .unwrap();
    assert!(matches!(session.receive().await, Err(ClientError::Geschlossen)));
    assert_eq!(session.state(), SessionState::Closed);

    let grund = tokio::time::timeout(Duration::from_secs(3), grund_rx)
        .await
        .expect("keine Bestaetigung empfangen")
        .unwrap();
    assert_eq!(grund, b"Disconnect bestaetigt");
}
