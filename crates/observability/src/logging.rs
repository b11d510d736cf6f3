//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `FOSEN_LOG_LEVEL`: Log-Level oder EnvFilter-Direktive, Standard: info
//! - `FOSEN_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Session-IDs werden als Tracing-Span-Felder propagiert.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialisiert das Logging-System.
///
/// `FOSEN_LOG_LEVEL` und `FOSEN_LOG_FORMAT` haben Vorrang vor den
/// uebergebenen Werten aus der Konfiguration.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env("FOSEN_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format_env = std::env::var("FOSEN_LOG_FORMAT").unwrap_or_else(|_| format.to_string());

    match format_env.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
