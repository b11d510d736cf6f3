//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Result};
use fosen_auth::Benutzereintrag;
use fosen_crypto::{DEFAULT_ITERATIONS, MIN_ITERATIONS};
use fosen_observability::logging::{log_format_gueltig, log_level_gueltig};
use fosen_protocol::wire::DEFAULT_MAX_FRAME_SIZE;
use fosen_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Session-Einstellungen (Idle-Timeout, Frame-Groesse, KDF)
    pub session: SessionEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
    /// Benutzer fuer den Credential-Store
    pub benutzer: Vec<Benutzereintrag>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerEinstellungen::default(),
            netzwerk: NetzwerkEinstellungen::default(),
            session: SessionEinstellungen::default(),
            logging: LoggingEinstellungen::default(),
            observability: ObservabilityEinstellungen::default(),
            benutzer: demo_benutzer(),
        }
    }
}

/// Demo-Zugaenge fuer den Betrieb ohne Konfigurationsdatei
pub fn demo_benutzer() -> Vec<Benutzereintrag> {
    vec![
        Benutzereintrag::neu("admin", "admin123"),
        Benutzereintrag::neu("user1", "password1"),
        Benutzereintrag::neu("user2", "password2"),
    ]
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Sessions
    pub max_sessions: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Fosen Tunnel".into(),
            max_sessions: 100,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den Tunnel-Listener
    pub bind_adresse: String,
    /// Port fuer den Tunnel-Listener
    pub port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8888,
        }
    }
}

/// Session-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionEinstellungen {
    /// Sekunden ohne empfangenen Frame bis zum Schliessen
    pub idle_timeout_sek: u64,
    /// Maximale Payload-Groesse eines Frames in Bytes
    pub max_frame_bytes: usize,
    /// PBKDF2-Iterationen (mindestens 100000)
    pub kdf_iterationen: u32,
}

impl Default for SessionEinstellungen {
    fn default() -> Self {
        Self {
            idle_timeout_sek: 90,
            max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
            kdf_iterationen: DEFAULT_ITERATIONS,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> Result<()> {
        if self.server.max_sessions == 0 {
            bail!("server.max_sessions muss mindestens 1 sein");
        }
        if self.session.idle_timeout_sek == 0 {
            bail!("session.idle_timeout_sek muss mindestens 1 sein");
        }
        if self.session.kdf_iterationen < MIN_ITERATIONS {
            bail!(
                "session.kdf_iterationen muss mindestens {MIN_ITERATIONS} sein (ist {})",
                self.session.kdf_iterationen
            );
        }
        if !log_level_gueltig(&self.logging.level) {
            bail!("logging.level '{}' ist ungueltig", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("logging.format '{}' ist ungueltig (text oder json)", self.logging.format);
        }
        if self.session.max_frame_bytes == 0 {
            bail!("session.max_frame_bytes muss groesser als 0 sein");
        }

        let mut gesehen = HashSet::new();
        for eintrag in &self.benutzer {
            if !gesehen.insert(eintrag.username.as_str()) {
                bail!("Benutzer '{}' ist mehrfach konfiguriert", eintrag.username);
            }
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse fuer den Tunnel-Listener zurueck
    pub fn tunnel_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: Duration::from_secs(self.session.idle_timeout_sek),
            max_frame_bytes: self.session.max_frame_bytes,
            kdf_iterationen: self.session.kdf_iterationen,
        }
    }

    /// Sind noch die mitgelieferten Demo-Zugaenge aktiv?
    pub fn demo_benutzer_aktiv(&self) -> bool {
        let demo = demo_benutzer();
        self.benutzer
            .iter()
            .any(|b| demo.iter().any(|d| d.username == b.username && d.secret == b.secret))
    }
}
