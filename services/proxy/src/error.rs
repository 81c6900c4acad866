//! Error taxonomy for a proxied session.
//!
//! Every failure inside a connection is terminal for that connection. The
//! connection driver turns a [`SessionError`] into its disconnect behavior
//! through [`SessionError::disconnect_reason`]: a JSON chat component when
//! the client should be told why, `None` for a silent close.

use std::io;

use lodestone_protocol::{chat, CipherError, ProtocolError, VERSION_NAME};
use thiserror::Error;

/// Reason shown when the session server rejects a login.
pub const BAD_AUTH_REASON: &str = "bad auth";

/// Reason shown when the chosen backend cannot be reached.
pub const DIAL_FAILED_REASON: &str = "failed to open proxy connection";

/// Reason shown when no backend serves the requested domain.
pub const NO_BACKEND_REASON: &str = "no backend available";

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed or unexpected packet.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// RSA or cipher failure during the key exchange.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Login could not be verified.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Backend could not be selected, reached or relayed to.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Client speaks a protocol version other than the compiled-in one.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(i32),

    /// Client stopped answering keepalives.
    #[error("keepalive timeout")]
    Timeout,

    /// Client closed the connection.
    #[error("client closed connection")]
    ClientClosed,

    /// Proxy is shutting down.
    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    /// Stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Protocol(_) => "protocol",
            SessionError::Crypto(_) => "crypto",
            SessionError::Auth(_) => "auth",
            SessionError::Backend(_) => "backend",
            SessionError::UnsupportedVersion(_) => "unsupported_version",
            SessionError::Timeout => "timeout",
            SessionError::ClientClosed => "client_closed",
            SessionError::Cancelled => "cancelled",
        }
    }

    /// JSON chat component to send before closing, if the client gets one.
    pub fn disconnect_reason(&self) -> Option<String> {
        match self {
            SessionError::Auth(AuthError::Rejected { .. }) => Some(chat::text(BAD_AUTH_REASON)),
            SessionError::Backend(err) => err.disconnect_reason(),
            SessionError::UnsupportedVersion(_) => Some(chat::text(&format!(
                "unsupported client version, this server runs {VERSION_NAME}"
            ))),
            _ => None,
        }
    }

    /// True for endings that are part of normal operation.
    pub fn is_benign(&self) -> bool {
        match self {
            SessionError::ClientClosed | SessionError::Cancelled => true,
            SessionError::Protocol(err) => err.is_transport(),
            _ => false,
        }
    }
}

/// RSA or stream cipher failures. Always a silent close.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to decrypt {field}")]
    Decrypt { field: &'static str },

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Session verification failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The echoed verify token did not match the one we issued.
    #[error("verify token mismatch")]
    VerifyTokenMismatch,

    /// Session server answered with something other than 200.
    #[error("session server rejected login with status {status}")]
    Rejected { status: u16 },

    /// Session server could not be reached.
    #[error("session server unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    /// Session server answered 200 with an unusable profile.
    #[error("malformed profile: {0}")]
    MalformedProfile(String),
}

/// Backend selection, dial and relay failures.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No group serves the requested domain.
    #[error("no backend group for domain {domain:?}")]
    NoBackend { domain: String },

    /// The group for the domain has no targets.
    #[error("backend group for domain {domain:?} has no targets")]
    EmptyGroup { domain: String },

    /// Could not connect to the target.
    #[error("failed to dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The backend login phase broke down.
    #[error("backend handshake failed: {0}")]
    Handshake(#[source] ProtocolError),

    /// The backend wants something the relay cannot provide.
    #[error("backend requires {0}")]
    Unsupported(&'static str),

    /// The backend sent a login disconnect; `reason` is its chat component.
    #[error("backend rejected login: {reason}")]
    Rejected { reason: String },

    /// I/O failure while relaying.
    #[error("relay failed: {0}")]
    Relay(#[source] ProtocolError),
}

impl BackendError {
    fn disconnect_reason(&self) -> Option<String> {
        match self {
            BackendError::NoBackend { domain } => Some(chat::text(&format!(
                "{NO_BACKEND_REASON} for {domain}"
            ))),
            BackendError::EmptyGroup { .. } => Some(chat::text(NO_BACKEND_REASON)),
            BackendError::Dial { .. }
            | BackendError::Handshake(_)
            | BackendError::Unsupported(_) => Some(chat::text(DIAL_FAILED_REASON)),
            BackendError::Rejected { reason } => Some(reason.clone()),
            BackendError::Relay(_) => None,
        }
    }
}

/// Target selection failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no backend group for domain {0:?}")]
    NotFound(String),

    #[error("backend group has no targets")]
    EmptyTargets,
}

impl SelectError {
    pub(crate) fn into_backend_error(self, domain: &str) -> BackendError {
        match self {
            SelectError::NotFound(domain) => BackendError::NoBackend { domain },
            SelectError::EmptyTargets => BackendError::EmptyGroup {
                domain: domain.to_string(),
            },
        }
    }
}
