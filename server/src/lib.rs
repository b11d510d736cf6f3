//! fosen-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Credential-Store, Tunnel-Listener und
//! Observability-Server. Stellt den oeffentlichen Einstiegspunkt fuer
//! Integrationstests bereit.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use config::ServerConfig;
use fosen_auth::CredentialStore;
use fosen_observability::{observability_server_starten, TunnelMetrics};
use fosen_session::{SessionKontext, SessionRegistry, TunnelServer};
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    tunnel: TunnelServer,
    metriken: TunnelMetrics,
    credentials: Arc<CredentialStore>,
}

impl Server {
    /// Baut den Credential-Store auf und bindet den Tunnel-Listener
    pub async fn binden(config: ServerConfig) -> Result<Self> {
        config.validieren()?;

        let credentials = Arc::new(
            CredentialStore::aus_eintraegen(config.benutzer.iter().cloned())
                .context("Benutzerliste ungueltig")?,
        );
        if config.demo_benutzer_aktiv() {
            tracing::warn!("Demo-Zugangsdaten aktiv – fuer den Produktivbetrieb eigene [[benutzer]] konfigurieren");
        }
        if credentials.is_empty() {
            tracing::warn!("Keine Benutzer konfiguriert – jede Anmeldung wird abgelehnt");
        }

        let metriken = TunnelMetrics::neu()?;
        let kontext = SessionKontext::neu(
            Arc::clone(&credentials),
            config.session_config(),
            metriken.clone(),
        );
        let adresse = config.tunnel_bind_adresse();
        let tunnel = TunnelServer::binden(adresse.as_str(), kontext, config.server.max_sessions)
            .await
            .with_context(|| format!("Tunnel-Listener auf {adresse} konnte nicht gebunden werden"))?;

        Ok(Self {
            config,
            tunnel,
            metriken,
            credentials,
        })
    }

    pub fn lokale_adresse(&self) -> Result<SocketAddr> {
        Ok(self.tunnel.lokale_adresse()?)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.tunnel.registry()
    }

    pub fn credentials(&self) -> Arc<CredentialStore> {
        Arc::clone(&self.credentials)
    }

    /// Laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown-Signal empfangen, Server wird beendet"),
                Err(e) => tracing::error!(fehler = %e, "Ctrl-C-Handler konnte nicht registriert werden"),
            }
            let _ = shutdown_tx.send(true);
        });

        self.laufen(shutdown_rx).await
    }

    /// Startet alle Subsysteme und laeuft bis `shutdown_rx` auf `true` wechselt
    pub async fn laufen(self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let lokale_adresse = self.lokale_adresse()?;
        tracing::info!(
            server_name = %self.config.server.name,
            adresse = %lokale_adresse,
            max_sessions = self.config.server.max_sessions,
            benutzer = ?self.credentials.usernames(),
            "Server startet"
        );

        let observability = if self.config.observability.aktiviert {
            let bind: SocketAddr = self
                .config
                .observability_bind_adresse()
                .parse()
                .context("Observability-Adresse ungueltig")?;
            let metriken = self.metriken.clone();
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = observability_server_starten(bind, metriken, rx).await {
                    tracing::error!(fehler = %e, "Observability-Server fehlgeschlagen");
                }
            }))
        } else {
            None
        };

        self.tunnel.starten(shutdown_rx).await?;

        if let Some(handle) = observability {
            let _ = handle.await;
        }
        tracing::info!("Server beendet");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.config.server.name)
            .field("tunnel", &self.tunnel)
            .finish()
    }
}
