//! fosen-session – Session-Zustandsautomat und Server-Listener
//!
//! Dieses Crate implementiert:
//! - Den expliziten Zustandsautomaten einer Session (Server und Client)
//! - Versiegeln/Oeffnen von Frames mit dem Session-Schluessel
//! - Die serverseitige Session (Handshake, Auth, Datenaustausch, Abbau)
//! - Die Session-Registry mit Limit, Introspektion und Trennen
//! - Den TCP-Listener

pub mod error;
pub mod handler;
pub mod registry;
pub mod sealing;
pub mod server;
pub mod session;
pub mod state;

pub use error::{SessionError, SessionResult, TransportError};
pub use handler::{DataHandler, EchoHandler};
pub use registry::{SessionGuard, SessionId, SessionInfo, SessionRegistry};
pub use sealing::{frame_oeffnen, frame_versiegeln};
pub use server::TunnelServer;
pub use session::{ServerSession, SessionConfig, SessionEnde, SessionKontext};
pub use state::{Ereignis, SessionState, Zustandsautomat};
