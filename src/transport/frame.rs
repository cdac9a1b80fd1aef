//! Length-prefixed frame codec.
//!
//! ```text
//! +----------------+------+-----------------+
//! | len: u32 (BE)  | kind | payload         |
//! +----------------+------+-----------------+
//!   len = 1 + payload.len()
//! ```

use bytes::{Buf, BufMut, BytesMut};
use std::convert::TryFrom;
use std::time::Duration;

use crate::defs::MAX_FRAME_LEN;
use crate::errors::{CodecError, TransportError};

/// Size of the length prefix.
pub const LEN_PREFIX: usize = 4;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Consumer opens negotiation.
    ConnectRequest,
    /// Provider accepts the connection.
    ConnectAck,
    /// Provider refuses the connection; the payload is the reason.
    ConnectNak,
    /// One encoded message.
    Data,
    /// Keepalive with an empty payload.
    Ping,
}

impl TryFrom<u8> for FrameKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => FrameKind::ConnectRequest,
            2 => FrameKind::ConnectAck,
            3 => FrameKind::ConnectNak,
            4 => FrameKind::Data,
            5 => FrameKind::Ping,
            other => return Err(CodecError::UnknownFrameKind(other)),
        })
    }
}

impl From<FrameKind> for u8 {
    fn from(kind: FrameKind) -> Self {
        match kind {
            FrameKind::ConnectRequest => 1,
            FrameKind::ConnectAck => 2,
            FrameKind::ConnectNak => 3,
            FrameKind::Data => 4,
            FrameKind::Ping => 5,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Bytes after the kind byte.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        LEN_PREFIX + 1 + self.payload.len()
    }
}

/// Appends one frame to `out`.
pub fn encode(kind: FrameKind, payload: &[u8], out: &mut BytesMut) {
    out.reserve(LEN_PREFIX + 1 + payload.len());
    out.put_u32((payload.len() + 1) as u32);
    out.put_u8(kind.into());
    out.put_slice(payload);
}

/// Length announced by the prefix of the first frame, once the prefix is buffered.
fn announced_len(buf: &[u8]) -> Result<Option<usize>, TransportError> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len == 0 {
        return Err(TransportError::Protocol("zero-length frame".into()));
    }
    if len > MAX_FRAME_LEN + 1 {
        return Err(TransportError::FrameTooLarge(len - 1));
    }
    Ok(Some(len))
}

/// Length of the first frame in `buf` if it is fully buffered.
fn complete_len(buf: &[u8]) -> Result<Option<usize>, TransportError> {
    match announced_len(buf)? {
        Some(len) if buf.len() >= LEN_PREFIX + len => Ok(Some(len)),
        _ => Ok(None),
    }
}

/// Bytes still missing before `buf` starts with a complete frame.
///
/// While the prefix is incomplete only the rest of the prefix is counted.
pub fn missing_len(buf: &[u8]) -> Result<usize, TransportError> {
    Ok(match announced_len(buf)? {
        Some(len) => (LEN_PREFIX + len).saturating_sub(buf.len()),
        None => LEN_PREFIX - buf.len(),
    })
}

/// Splits the first complete frame off `buf`, if there is one.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
    let len = match complete_len(buf)? {
        Some(len) => len,
        None => return Ok(None),
    };
    buf.advance(LEN_PREFIX);
    let mut body = buf.split_to(len);
    let kind = FrameKind::try_from(body.get_u8())?;
    Ok(Some(Frame {
        kind,
        payload: body.to_vec(),
    }))
}

/// Whether `buf` starts with a complete frame.
pub fn has_complete_frame(buf: &[u8]) -> bool {
    matches!(complete_len(buf), Ok(Some(_)))
}

/// Encodes the body of a ConnectRequest or ConnectAck.
pub fn encode_handshake(ping_timeout: Duration, component: &str) -> Vec<u8> {
    let secs = ping_timeout.as_secs().min(u16::MAX as u64) as u16;
    let mut body = Vec::with_capacity(2 + component.len());
    body.extend_from_slice(&secs.to_be_bytes());
    body.extend_from_slice(component.as_bytes());
    body
}

/// Decodes the body of a ConnectRequest or ConnectAck.
pub fn decode_handshake(payload: &[u8]) -> Result<(Duration, String), TransportError> {
    if payload.len() < 2 {
        return Err(TransportError::Protocol("truncated handshake".into()));
    }
    let secs = u16::from_be_bytes([payload[0], payload[1]]);
    let component = String::from_utf8_lossy(&payload[2..]).into_owned();
    Ok((Duration::from_secs(secs as u64), component))
}
