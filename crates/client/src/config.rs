//! Client-Konfiguration

use std::time::Duration;

use fosen_crypto::DEFAULT_ITERATIONS;
use fosen_protocol::wire::DEFAULT_MAX_FRAME_SIZE;

/// Verbindungsparameter fuer den Client
#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Gilt fuer TCP-Connect, Handshake und Anmeldung zusammen
    pub connect_timeout: Duration,
    /// Abstand zwischen KeepAlive-Frames
    pub keepalive_intervall: Duration,
    /// Zeit ohne empfangenen Frame bis die Session geschlossen wird
    pub idle_timeout: Duration,
    pub max_frame_bytes: usize,
    pub kdf_iterationen: u32,
}

impl ClientConfig {
    pub fn neu(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(10),
            keepalive_intervall: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
            kdf_iterationen: DEFAULT_ITERATIONS,
        }
    }

    pub fn adresse(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("connect_timeout", &self.connect_timeout)
            .field("keepalive_intervall", &self.keepalive_intervall)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}
