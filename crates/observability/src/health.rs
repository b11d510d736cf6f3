//! Health-Check-Endpunkt fuer Fosen
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Anzahl aktiver Sessions

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use prometheus::IntGauge;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: i64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    sessions_active: IntGauge,
}

impl HealthState {
    pub fn neu(sessions_active: IntGauge) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            sessions_active,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn aktive_sessions(&self) -> i64 {
        self.sessions_active.get()
    }

    fn antwort(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            active_sessions: self.aktive_sessions(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
///
/// Solange der Prozess antwortet, ist der Listener erreichbar.
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.antwort()))
}
