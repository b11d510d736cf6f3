//! fosen-client – Client-Connector
//!
//! Baut eine Verbindung zum Fosen-Server auf, fuehrt Handshake und
//! Anmeldung durch und stellt danach `send`/`receive` fuer Klartext bereit.

pub mod config;
pub mod connector;
pub mod error;
pub mod session;

pub use config::ClientConfig;
pub use connector::ClientConnector;
pub use error::{ClientError, ConnectError};
pub use session::ClientSession;
