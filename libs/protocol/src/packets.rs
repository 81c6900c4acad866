//! Typed packets.
//!
//! Only the packets the proxy itself reads or writes are modelled. Play-phase
//! traffic is otherwise relayed as opaque [`Frame`]s.
//!
//! Packet ids are scoped to a connection state and direction, so several
//! types share an id. Decoding trailing bytes after the last field is
//! tolerated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::codec::{PacketBufExt, PacketBufMutExt};
use crate::error::ProtocolError;
use crate::frame::{encode_frame, Frame};

const MAX_ADDRESS_LEN: usize = 255;
const MAX_USERNAME_LEN: usize = 16;
const MAX_SERVER_ID_LEN: usize = 20;
const MAX_CHAT_LEN: usize = 262_144;
const MAX_STATUS_LEN: usize = 32_767;
const MAX_CHANNEL_LEN: usize = 32_767;
const MAX_CRYPTO_FIELD_LEN: usize = 1024;

/// A packet with a fixed id in its state and direction.
pub trait Packet: Sized {
    const ID: i32;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError>;

    fn encode_body(&self, buf: &mut BytesMut);

    /// Decode from a frame, checking the id first.
    fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        if frame.id() != Self::ID {
            return Err(ProtocolError::UnexpectedPacket {
                expected: Self::ID,
                actual: frame.id(),
            });
        }
        Self::decode_body(&mut frame.body())
    }

    /// Id followed by body, without the length prefix.
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_varint(Self::ID);
        self.encode_body(&mut buf);
        buf.freeze()
    }

    /// Fully framed bytes ready for the wire.
    fn to_frame(&self) -> Bytes {
        encode_frame(&self.encode())
    }
}

/// State requested by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
}

impl NextState {
    pub fn as_varint(self) -> i32 {
        match self {
            NextState::Status => 1,
            NextState::Login => 2,
        }
    }
}

impl TryFrom<i32> for NextState {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NextState::Status),
            2 => Ok(NextState::Login),
            other => Err(ProtocolError::InvalidNextState(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Handshaking (serverbound)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: NextState,
}

impl Packet for Handshake {
    const ID: i32 = 0x00;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            protocol_version: body.get_varint()?,
            server_address: body.get_string(MAX_ADDRESS_LEN)?,
            server_port: body.get_checked_u16()?,
            next_state: NextState::try_from(body.get_varint()?)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_varint(self.protocol_version);
        buf.put_string(&self.server_address);
        buf.put_u16(self.server_port);
        buf.put_varint(self.next_state.as_varint());
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRequest;

impl Packet for StatusRequest {
    const ID: i32 = 0x00;

    fn decode_body(_body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self)
    }

    fn encode_body(&self, _buf: &mut BytesMut) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub json: String,
}

impl Packet for StatusResponse {
    const ID: i32 = 0x00;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            json: body.get_string(MAX_STATUS_LEN)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_string(&self.json);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub payload: i64,
}

impl Packet for Ping {
    const ID: i32 = 0x01;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: body.get_checked_i64()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_i64(self.payload);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub payload: i64,
}

impl Packet for Pong {
    const ID: i32 = 0x01;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: body.get_checked_i64()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_i64(self.payload);
    }
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub username: String,
}

impl Packet for LoginStart {
    const ID: i32 = 0x00;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: body.get_string(MAX_USERNAME_LEN)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_string(&self.username);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub server_id: String,
    pub public_key: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl Packet for EncryptionRequest {
    const ID: i32 = 0x01;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            server_id: body.get_string(MAX_SERVER_ID_LEN)?,
            public_key: body.get_byte_array(MAX_CRYPTO_FIELD_LEN)?,
            verify_token: body.get_byte_array(MAX_CRYPTO_FIELD_LEN)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_string(&self.server_id);
        buf.put_byte_array(&self.public_key);
        buf.put_byte_array(&self.verify_token);
    }
}

/// Both fields are RSA ciphertexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResponse {
    pub shared_secret: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl Packet for EncryptionResponse {
    const ID: i32 = 0x01;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            shared_secret: body.get_byte_array(MAX_CRYPTO_FIELD_LEN)?,
            verify_token: body.get_byte_array(MAX_CRYPTO_FIELD_LEN)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_byte_array(&self.shared_secret);
        buf.put_byte_array(&self.verify_token);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSuccess {
    pub uuid: Uuid,
    pub username: String,
}

impl Packet for LoginSuccess {
    const ID: i32 = 0x02;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            uuid: body.get_uuid()?,
            username: body.get_string(MAX_USERNAME_LEN)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_uuid(&self.uuid);
        buf.put_string(&self.username);
    }
}

/// Disconnect sent while still in the login state. `reason` is a JSON chat
/// component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginDisconnect {
    pub reason: String,
}

impl Packet for LoginDisconnect {
    const ID: i32 = 0x00;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: body.get_string(MAX_CHAT_LEN)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_string(&self.reason);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCompression {
    pub threshold: i32,
}

impl Packet for SetCompression {
    const ID: i32 = 0x03;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            threshold: body.get_varint()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_varint(self.threshold);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPluginRequest {
    pub message_id: i32,
    pub channel: String,
    pub data: Bytes,
}

impl Packet for LoginPluginRequest {
    const ID: i32 = 0x04;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        let message_id = body.get_varint()?;
        let channel = body.get_string(MAX_CHANNEL_LEN)?;
        let data = body.copy_to_bytes(body.remaining());
        Ok(Self {
            message_id,
            channel,
            data,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_varint(self.message_id);
        buf.put_string(&self.channel);
        buf.put_slice(&self.data);
    }
}

/// Reply to a [`LoginPluginRequest`]; `data` is only sent when understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPluginResponse {
    pub message_id: i32,
    pub data: Option<Bytes>,
}

impl LoginPluginResponse {
    pub fn not_understood(message_id: i32) -> Self {
        Self {
            message_id,
            data: None,
        }
    }
}

impl Packet for LoginPluginResponse {
    const ID: i32 = 0x02;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        let message_id = body.get_varint()?;
        let data = if body.get_checked_bool()? {
            Some(body.copy_to_bytes(body.remaining()))
        } else {
            None
        };
        Ok(Self { message_id, data })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_varint(self.message_id);
        match &self.data {
            Some(data) => {
                buf.put_u8(1);
                buf.put_slice(data);
            }
            None => buf.put_u8(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Play (only what the proxy emits or inspects)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveClientbound {
    pub id: i64,
}

impl Packet for KeepAliveClientbound {
    const ID: i32 = 0x1F;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: body.get_checked_i64()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_i64(self.id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveServerbound {
    pub id: i64,
}

impl Packet for KeepAliveServerbound {
    const ID: i32 = 0x10;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: body.get_checked_i64()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_i64(self.id);
    }
}

/// Disconnect sent once the client is in the play state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayDisconnect {
    pub reason: String,
}

impl Packet for PlayDisconnect {
    const ID: i32 = 0x19;

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: body.get_string(MAX_CHAT_LEN)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_string(&self.reason);
    }
}
