//! Versiegelte Frames
//!
//! Alle Frames ausser `Handshake` tragen `IV | CIPHERTEXT+TAG` als Payload.

use fosen_crypto::{open_payload, seal, SessionKey};
use fosen_protocol::{Frame, MessageKind, ProtocolError};

use crate::error::SessionResult;

/// Versiegelt einen Klartext und verpackt ihn in einen Frame
pub fn frame_versiegeln(key: &SessionKey, kind: MessageKind, klartext: &[u8]) -> SessionResult<Frame> {
    if !kind.ist_versiegelt() {
        return Err(ProtocolError::payload(format!("{kind}-Frames werden nicht versiegelt")).into());
    }
    let sealed = seal(key, klartext)?;
    Ok(Frame::neu(kind, sealed.to_bytes()))
}

/// Oeffnet den Payload eines versiegelten Frames
///
/// Ein Tag-Fehler ist fatal fuer die Session.
pub fn frame_oeffnen(key: &SessionKey, frame: &Frame) -> SessionResult<Vec<u8>> {
    if !frame.kind.ist_versiegelt() {
        return Err(ProtocolError::payload(format!("{}-Frame ist nicht versiegelt", frame.kind)).into());
    }
    Ok(open_payload(key, &frame.payload)?)
}
