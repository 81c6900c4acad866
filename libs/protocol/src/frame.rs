//! Length-prefixed framing.
//!
//! Every packet on the wire is `VarInt(length) || payload` where the payload
//! starts with a VarInt packet id. Frames are read into a reusable
//! [`BytesMut`] and handed out as cheap [`Bytes`] slices.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::cipher::CipherStream;
use crate::codec::{peek_varint, varint_len, PacketBufExt, PacketBufMutExt};
use crate::error::{CipherError, ProtocolError};
use crate::packets::Packet;

/// Largest payload a single frame may declare.
pub const MAX_FRAME_LEN: usize = 2_097_151;

const READ_CHUNK: usize = 4096;

/// One decoded frame: the packet id plus the bytes that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: i32,
    payload: Bytes,
    body_offset: usize,
}

impl Frame {
    /// Parse the packet id out of a frame payload.
    pub fn from_payload(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut cursor = &payload[..];
        let id = cursor.get_varint()?;
        let body_offset = payload.len() - cursor.len();
        Ok(Self {
            id,
            payload,
            body_offset,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Packet body, without the id.
    pub fn body(&self) -> Bytes {
        self.payload.slice(self.body_offset..)
    }

    /// Id and body exactly as they appeared on the wire.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Re-frame the payload for forwarding.
    pub fn to_wire(&self) -> Bytes {
        encode_frame(&self.payload)
    }
}

/// Prefix `payload` with its VarInt length.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(varint_len(payload.len() as i32) + payload.len());
    buf.put_varint(payload.len() as i32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split one complete frame off the front of `buf`, if there is one.
pub(crate) fn parse_frame(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some((len, prefix)) = peek_varint(&buf[..])? else {
        return Ok(None);
    };
    if len <= 0 || len as usize > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameLength(i64::from(len)));
    }
    let len = len as usize;
    if buf.len() < prefix + len {
        buf.reserve(prefix + len - buf.len());
        return Ok(None);
    }
    let _ = buf.split_to(prefix);
    let payload = buf.split_to(len).freeze();
    Frame::from_payload(payload).map(Some)
}

/// Read the next frame, buffering partial data in `buf`.
///
/// Returns `Ok(None)` when the peer closes cleanly on a frame boundary.
async fn read_frame_into<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = parse_frame(buf)? {
            return Ok(Some(frame));
        }
        buf.reserve(READ_CHUNK);
        if reader.read_buf(buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(ProtocolError::UnexpectedEof)
            };
        }
    }
}

/// Frame reader over any async byte source.
pub struct PacketReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer(reader, BytesMut::with_capacity(READ_CHUNK))
    }

    fn with_buffer(reader: R, buf: BytesMut) -> Self {
        Self { reader, buf }
    }

    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        read_frame_into(&mut self.reader, &mut self.buf).await
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }
}

/// Frame writer over any async byte sink.
pub struct PacketWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_packet<P: Packet>(&mut self, packet: &P) -> Result<(), ProtocolError> {
        self.write_raw(&packet.to_frame()).await
    }

    /// Write bytes that are already length-prefixed.
    pub async fn write_raw(&mut self, framed: &[u8]) -> Result<(), ProtocolError> {
        self.writer.write_all(framed).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Bidirectional framed connection with an optional cipher.
pub struct PacketStream<S> {
    stream: CipherStream<S>,
    buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: CipherStream::new(stream),
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        read_frame_into(&mut self.stream, &mut self.buf).await
    }

    pub async fn write_packet<P: Packet>(&mut self, packet: &P) -> Result<(), ProtocolError> {
        self.write_raw(&packet.to_frame()).await
    }

    pub async fn write_raw(&mut self, framed: &[u8]) -> Result<(), ProtocolError> {
        self.stream.write_all(framed).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Switch both directions to AES/CFB8 keyed by `shared_secret`.
    ///
    /// Bytes already buffered but not yet parsed arrived after the peer
    /// switched, so they are decrypted in place.
    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), CipherError> {
        self.stream.enable(shared_secret)?;
        self.stream.decrypt_buffered(&mut self.buf[..]);
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.stream.is_encrypted()
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Split into independently owned halves, keeping buffered input.
    #[allow(clippy::type_complexity)]
    pub fn into_split(
        self,
    ) -> (
        PacketReader<ReadHalf<CipherStream<S>>>,
        PacketWriter<WriteHalf<CipherStream<S>>>,
    ) {
        let (read, write) = tokio::io::split(self.stream);
        (
            PacketReader::with_buffer(read, self.buf),
            PacketWriter::new(write),
        )
    }
}
