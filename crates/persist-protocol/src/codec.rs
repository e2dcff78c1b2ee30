use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Envelope, MAX_MESSAGE_SIZE};

const HEADER_LEN: usize = 5;

/// Codec for persister peer frames.
pub struct PeerCodec;

impl PeerCodec {
    /// Encode an envelope with framing: [4 bytes len][1 byte tag][payload]
    pub fn encode(envelope: &Envelope) -> ProtocolResult<Vec<u8>> {
        let payload = bincode::serialize(envelope)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(envelope.message.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode one frame. Returns (envelope, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(Envelope, usize)> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let total = 4 + Self::frame_len(data)?;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let envelope = Self::decode_body(data[4], &data[HEADER_LEN..total])?;
        Ok((envelope, total))
    }

    /// Length field of a frame header, validated.
    fn frame_len(header: &[u8]) -> ProtocolResult<usize> {
        let mut len = [0u8; 4];
        len.copy_from_slice(&header[..4]);
        let len = u32::from_be_bytes(len) as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(len)
    }

    fn decode_body(tag: u8, payload: &[u8]) -> ProtocolResult<Envelope> {
        let envelope: Envelope = bincode::deserialize(payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if envelope.message.type_tag() != tag {
            return Err(ProtocolError::InvalidMessageType(tag));
        }
        Ok(envelope)
    }

    /// Write one frame and flush.
    pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> ProtocolResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = Self::encode(envelope)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame. `None` on a clean end of stream between frames.
    pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<Envelope>>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = Self::frame_len(&header)?;
        let mut payload = vec![0u8; len - 1];
        reader.read_exact(&mut payload).await?;
        Self::decode_body(header[4], &payload).map(Some)
    }
}

/// Accumulates partial reads and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// The next complete frame, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> ProtocolResult<Option<Envelope>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let total = 4 + PeerCodec::frame_len(&self.buf)?;
        if self.buf.len() < total {
            return Ok(None);
        }
        let envelope = PeerCodec::decode_body(self.buf[4], &self.buf[HEADER_LEN..total]);
        self.buf.advance(total);
        envelope.map(Some)
    }
}
