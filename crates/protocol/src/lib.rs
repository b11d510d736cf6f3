//! fosen-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert das Frame-Format, die Nachrichtentypen und die
//! Payload-Strukturen fuer Handshake und Authentifizierung, die zwischen
//! Client und Server ausgetauscht werden.

pub mod control;
pub mod error;
pub mod frame;
pub mod wire;

pub use control::{
    AuthRequest, AuthResponse, AuthStatus, HandshakeRequest, HandshakeResponse, HandshakeStatus,
    PROTOCOL_VERSION, SALT_LEN,
};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{Frame, MessageKind};
pub use wire::{decode_frame, encode_frame, read_frame, write_frame, FrameCodec};
