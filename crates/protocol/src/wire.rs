//! Wire-Format fuer TCP-Verbindungen
//!
//! Frame-basiertes Protokoll mit festem 9-Byte-Header.
//!
//! ## Frame-Format
//!
//! ```text
//! +----+----+----+----+------+----+----+----+----+----...----+
//! | DE | AD | BE | EF | TYPE | Laenge (u32 BE)   | Payload    |
//! +----+----+----+----+------+----+----+----+----+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne Header).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 1 MiB).
//! Falsche Magic-Bytes werden sofort abgelehnt, ohne auf den Rest des
//! Headers zu warten.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{Frame, MessageKind};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Feste Kennung am Anfang jedes Frames
pub const MAGIC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Groesse des Headers: Magic(4) + Typ(1) + Laenge(4)
pub const HEADER_SIZE: usize = 9;

/// Standard-maximale Payload-Groesse (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Prueft die bisher empfangenen Bytes gegen die Magic-Bytes
fn magic_pruefen(verfuegbar: &[u8]) -> ProtocolResult<()> {
    let n = verfuegbar.len().min(MAGIC.len());
    if verfuegbar[..n] != MAGIC[..n] {
        return Err(ProtocolError::BadMagic);
    }
    Ok(())
}

/// Liest Typ und Laenge aus einem vollstaendigen Header
fn header_parsen(header: &[u8], max_frame_size: usize) -> ProtocolResult<(MessageKind, usize)> {
    magic_pruefen(&header[..MAGIC.len()])?;
    let kind = MessageKind::try_from(header[4])?;
    let laenge = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if laenge > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            laenge,
            maximum: max_frame_size,
        });
    }
    Ok((kind, laenge))
}

fn header_schreiben(kind: MessageKind, laenge: usize, dst: &mut BytesMut) {
    dst.put_slice(&MAGIC);
    dst.put_u8(kind.as_u8());
    dst.put_u32(laenge as u32);
}

fn groesse_pruefen(laenge: usize, max_frame_size: usize) -> ProtocolResult<()> {
    if laenge > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            laenge,
            maximum: max_frame_size,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer frame-basierte TCP-Verbindungen
///
/// Implementiert `Encoder<Frame>` und `Decoder` fuer nahtlose
/// Integration mit `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Payload-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Magic so frueh wie moeglich pruefen
        magic_pruefen(src)?;

        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let (kind, laenge) = header_parsen(&src[..HEADER_SIZE], self.max_frame_size)?;

        let gesamt = HEADER_SIZE + laenge;
        if src.len() < gesamt {
            // Speicher vorbelegen um Reallocations zu vermeiden
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(laenge).freeze();

        Ok(Some(Frame { kind, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            // Sauberes Ende an einer Frame-Grenze
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        groesse_pruefen(item.payload.len(), self.max_frame_size)?;

        dst.reserve(HEADER_SIZE + item.payload.len());
        header_schreiben(item.kind, item.payload.len(), dst);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Freie Funktionen
// ---------------------------------------------------------------------------

/// Kodiert einen Frame zu `MAGIC | TYPE | LAENGE | PAYLOAD`
pub fn encode_frame(kind: MessageKind, payload: &[u8]) -> ProtocolResult<Bytes> {
    groesse_pruefen(payload.len(), DEFAULT_MAX_FRAME_SIZE)?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    header_schreiben(kind, payload.len(), &mut buf);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Liest den naechsten Frame mit Standard-Limit
///
/// Siehe [`read_frame`].
pub async fn decode_frame<R>(reader: &mut R) -> ProtocolResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    read_frame(reader, DEFAULT_MAX_FRAME_SIZE).await
}

/// Liest einen einzelnen Frame aus einem `AsyncRead`
///
/// Wartet bis der Frame vollstaendig ist. Gibt `Ok(None)` zurueck wenn der
/// Stream sauber an einer Frame-Grenze endet.
///
/// # Fehler
/// - `Truncated` wenn der Stream mitten im Frame endet oder abbricht
/// - `BadMagic`, `UnknownKind`, `FrameTooLarge` bei ungueltigem Header
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> ProtocolResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];

    // Erstes Byte separat lesen, um EOF an der Frame-Grenze zu erkennen
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut header[1..])
        .await
        .map_err(|_| ProtocolError::Truncated)?;

    let (kind, laenge) = header_parsen(&header, max_frame_size)?;

    let mut payload = vec![0u8; laenge];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| ProtocolError::Truncated)?;

    Ok(Some(Frame::neu(kind, payload)))
}

/// Schreibt einen einzelnen Frame in einen `AsyncWrite`
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max_frame_size: usize) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    groesse_pruefen(frame.payload.len(), max_frame_size)?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + frame.payload.len());
    header_schreiben(frame.kind, frame.payload.len(), &mut buf);
    buf.put_slice(&frame.payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
