//! Prometheus-kompatible Metriken fuer Fosen
//!
//! Registrierte Metriken:
//! - `fosen_sessions_active` – Gauge: Aktuell registrierte Sessions
//! - `fosen_sessions_total` – Counter: Angenommene Sessions seit Start
//! - `fosen_sessions_rejected_total` – Counter: Wegen Limit geschlossene Verbindungen
//! - `fosen_auth_failures_total` – Counter: Abgelehnte Anmeldungen
//! - `fosen_session_faults_total` – Counter: Sessions im Zustand Faulted
//! - `fosen_frames_received_total` – Counter: Empfangene Frames (kind)

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Fosen-Prometheus-Metriken
///
/// Klone teilen sich dieselben Zaehler.
#[derive(Clone)]
pub struct TunnelMetrics {
    pub registry: Arc<Registry>,

    pub sessions_active: IntGauge,
    pub sessions_total: IntCounter,
    pub sessions_rejected_total: IntCounter,
    pub auth_failures_total: IntCounter,
    pub session_faults_total: IntCounter,
    pub frames_received_total: IntCounterVec,
}

impl TunnelMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let sessions_active = IntGauge::with_opts(Opts::new(
            "fosen_sessions_active",
            "Anzahl aktuell registrierter Sessions",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        let sessions_total = IntCounter::with_opts(Opts::new(
            "fosen_sessions_total",
            "Gesamtanzahl angenommener Sessions",
        ))?;
        registry.register(Box::new(sessions_total.clone()))?;

        let sessions_rejected_total = IntCounter::with_opts(Opts::new(
            "fosen_sessions_rejected_total",
            "Verbindungen die wegen max_sessions sofort geschlossen wurden",
        ))?;
        registry.register(Box::new(sessions_rejected_total.clone()))?;

        let auth_failures_total = IntCounter::with_opts(Opts::new(
            "fosen_auth_failures_total",
            "Gesamtanzahl abgelehnter Anmeldungen",
        ))?;
        registry.register(Box::new(auth_failures_total.clone()))?;

        let session_faults_total = IntCounter::with_opts(Opts::new(
            "fosen_session_faults_total",
            "Sessions die mit einem Protokoll- oder Kryptofehler endeten",
        ))?;
        registry.register(Box::new(session_faults_total.clone()))?;

        let frames_received_total = IntCounterVec::new(
            Opts::new(
                "fosen_frames_received_total",
                "Gesamtanzahl empfangener Frames",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(frames_received_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            sessions_active,
            sessions_total,
            sessions_rejected_total,
            auth_failures_total,
            session_faults_total,
            frames_received_total,
        })
    }

    /// Zaehlt einen empfangenen Frame
    pub fn frame_empfangen(&self, kind: &str) {
        self.frames_received_total.with_label_values(&[kind]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: TunnelMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<TunnelMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
