//! # fosen-observability
//!
//! Observability-Crate fuer Fosen:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured JSON Logging via tracing-subscriber

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, TunnelMetrics};

use anyhow::Result;
use std::net::SocketAddr;
use tokio::sync::watch;

/// Startet den Observability-HTTP-Server (Metriken + Health)
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
/// - `GET /health`  – Health-Check JSON
///
/// Laeuft bis `shutdown_rx` auf `true` wechselt.
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: TunnelMetrics,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    use axum::Router;

    let health = HealthState::neu(metriken.sessions_active.clone());
    let app = Router::new()
        .merge(metrics_router(metriken))
        .merge(health_router(health));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|v| *v).await;
        })
        .await?;
    Ok(())
}
