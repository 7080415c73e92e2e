//! Satellite wire protocol: framed binary messages over TCP.
//!
//! Every frame is an 8-byte header (4-byte ASCII tag + u32 LE payload
//! length) followed by the payload. Control frames carry a zero-length
//! payload. Unknown tags are preserved so callers can ignore them for
//! forward compatibility.

use crate::error::{AssistantError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on payload size: lengths that do not fit in a signed 32-bit
/// value (≥ 2³¹) are a protocol violation.
pub const MAX_PAYLOAD_BYTES: u32 = i32::MAX as u32;

/// Frame tags understood by either side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    /// Client requests channel open.
    Open,
    /// Alias for [`FrameTag::Open`] sent by wake-word satellites.
    Wake,
    /// Client audio chunk (int16 LE PCM, mono, 16 kHz).
    Aud0,
    /// Barge-in: cancel current TTS.
    Int0,
    /// Flush the current utterance.
    Stop,
    /// Server is ready to accept audio.
    Rdy0,
    /// Server TTS audio chunk (int16 LE PCM, mono, 16 kHz).
    Tts0,
    /// Server UX tone.
    Beep,
    /// Channel closed by the server.
    Clos,
    /// Any tag this implementation does not know. Ignored on receipt.
    Unknown([u8; 4]),
}

impl FrameTag {
    /// Parse a tag from its 4 wire bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"OPEN" => Self::Open,
            b"WAKE" => Self::Wake,
            b"AUD0" => Self::Aud0,
            b"INT0" => Self::Int0,
            b"STOP" => Self::Stop,
            b"RDY0" => Self::Rdy0,
            b"TTS0" => Self::Tts0,
            b"BEEP" => Self::Beep,
            b"CLOS" => Self::Clos,
            _ => Self::Unknown(bytes),
        }
    }

    /// The 4 wire bytes for this tag.
    pub fn as_bytes(&self) -> [u8; 4] {
        match self {
            Self::Open => *b"OPEN",
            Self::Wake => *b"WAKE",
            Self::Aud0 => *b"AUD0",
            Self::Int0 => *b"INT0",
            Self::Stop => *b"STOP",
            Self::Rdy0 => *b"RDY0",
            Self::Tts0 => *b"TTS0",
            Self::Beep => *b"BEEP",
            Self::Clos => *b"CLOS",
            Self::Unknown(bytes) => *bytes,
        }
    }
}

/// One decoded wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame tag.
    pub tag: FrameTag,
    /// Payload bytes; empty for control frames.
    pub payload: Vec<u8>,
}

impl Frame {
    /// A payload-less control frame.
    pub fn control(tag: FrameTag) -> Self {
        Self {
            tag,
            payload: Vec::new(),
        }
    }
}

/// Encode a frame into a single buffer (header + payload).
pub fn encode_frame(tag: FrameTag, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&tag.as_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub async fn write_frame<W>(writer: &mut W, tag: FrameTag, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(tag, payload)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end-of-stream (connection closed between
/// frames). A stream that ends inside a frame, or a length above
/// [`MAX_PAYLOAD_BYTES`], is a [`AssistantError::Protocol`] error — the
/// oversized length is rejected before any allocation.
///
/// # Errors
///
/// Returns an error on I/O failure or a malformed frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(AssistantError::Protocol(
                "connection closed mid-header".to_owned(),
            ));
        }
        filled += n;
    }

    let tag = FrameTag::from_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len > MAX_PAYLOAD_BYTES {
        return Err(AssistantError::Protocol(format!(
            "payload length {len} exceeds maximum {MAX_PAYLOAD_BYTES}"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(|e| {
        AssistantError::Protocol(format!("connection closed mid-frame ({len} byte payload): {e}"))
    })?;

    Ok(Some(Frame { tag, payload }))
}

/// Decode an `AUD0`/`TTS0` payload into int16 LE samples.
///
/// A trailing odd byte is dropped.
pub fn payload_to_i16(payload: &[u8]) -> Vec<i16> {
    payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode int16 samples into a little-endian payload.
pub fn i16_to_payload(samples: &[i16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        payload.extend_from_slice(&sample.to_le_bytes());
    }
    payload
}
