//! fosen-auth – Credential-Store
//!
//! Dieses Crate implementiert:
//! - Benutzername -> Geheimnis Zuordnung (in-memory, thread-sicher)
//! - Pruefung von Anmeldedaten mit zeitkonstantem Vergleich
//! - Benutzerverwaltung (hinzufuegen, entfernen, auflisten)

pub mod error;
pub mod store;

// Bequeme Re-Exporte
pub use error::{AuthError, AuthResult};
pub use store::{Benutzereintrag, CredentialStore};
