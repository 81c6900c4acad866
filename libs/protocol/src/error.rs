//! Error types for the wire codec and cipher.

use std::io;

use thiserror::Error;

/// Errors raised while framing or decoding packets.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A VarInt ran past its maximum encoded width.
    #[error("varint exceeds {max} bytes")]
    VarIntTooLong { max: usize },

    /// The buffer ended before a field was complete.
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// A frame declared a length outside `1..=MAX_FRAME_LEN`.
    #[error("frame length {0} out of bounds")]
    FrameLength(i64),

    /// A length-prefixed field declared a negative length.
    #[error("negative length {0} for {1}")]
    NegativeLength(i32, &'static str),

    /// A string exceeded the field's character limit.
    #[error("string of {len} bytes exceeds limit of {max} characters")]
    StringTooLong { len: usize, max: usize },

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// The frame carried a different packet than the one being decoded.
    #[error("unexpected packet id {actual:#04x}, expected {expected:#04x}")]
    UnexpectedPacket { expected: i32, actual: i32 },

    /// The handshake requested a state other than status or login.
    #[error("invalid next state {0}")]
    InvalidNextState(i32),

    /// The stream ended in the middle of a frame.
    #[error("connection closed mid-frame")]
    UnexpectedEof,

    /// Underlying transport error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Returns true if the error came from the transport rather than the bytes.
    pub fn is_transport(&self) -> bool {
        matches!(self, ProtocolError::Io(_) | ProtocolError::UnexpectedEof)
    }
}

/// Errors raised when installing the stream cipher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// The shared secret is not an AES-128 key.
    #[error("shared secret must be 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The cipher can only be installed once per stream.
    #[error("stream cipher already enabled")]
    AlreadyEnabled,
}
