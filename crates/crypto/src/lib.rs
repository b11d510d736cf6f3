//! # fosen-crypto
//!
//! Cipher-Layer fuer Fosen-Sessions.
//!
//! ## Module
//! - `kdf` - PBKDF2-HMAC-SHA256 Schluesselableitung (einmal pro Session)
//! - `cipher` - AES-256-GCM Versiegeln/Oeffnen einzelner Payloads
//! - `types` - Schluessel- und Payload-Typen
//! - `error` - Fehlertypen

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod types;

// Bequeme Re-Exports
pub use cipher::{open, open_payload, seal};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, DEFAULT_ITERATIONS, MIN_ITERATIONS};
pub use types::{generate_salt, SealedPayload, SessionKey, IV_LEN, KEY_LEN, MIN_SEALED_LEN, TAG_LEN};
