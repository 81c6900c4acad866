//! # lodestone-protocol
//!
//! Wire-level building blocks for the lodestone proxy.
//!
//! ## Contents
//!
//! - Primitive field encodings (VarInt, strings, UUIDs) on top of `bytes`
//! - Length-prefixed frame reading and writing over any tokio stream
//! - Typed packets for the handshake, status and login phases, plus the
//!   handful of play-phase packets the proxy emits itself
//! - The AES-128/CFB8 stream cipher installed after the key exchange
//! - The signed-hex session hash submitted to the session server
//!
//! Only one protocol version is spoken: [`PROTOCOL_VERSION`].

pub mod chat;
mod cipher;
mod codec;
mod digest;
mod error;
mod frame;
pub mod packets;

pub use cipher::CipherStream;
pub use codec::{varint_len, PacketBufExt, PacketBufMutExt, MAX_VARINT_LEN};
pub use digest::session_hash;
pub use error::{CipherError, ProtocolError};
pub use frame::{encode_frame, Frame, PacketReader, PacketStream, PacketWriter, MAX_FRAME_LEN};
pub use packets::{NextState, Packet};

/// Protocol number this build speaks.
pub const PROTOCOL_VERSION: i32 = 754;

/// Human-readable game version matching [`PROTOCOL_VERSION`].
pub const VERSION_NAME: &str = "1.16.5";
