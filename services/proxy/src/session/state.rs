//! Per-connection session state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use lodestone_protocol::packets::Handshake;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;
use uuid::Uuid;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state.
///
/// Moves forward only: `Handshaking` to `Status` or `Login`, `Login` to
/// `Play`. `Closed` is reachable from anywhere and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Status,
    Login,
    Play,
    Closed,
}

impl ConnectionState {
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Handshaking, Status) | (Handshaking, Login) | (Login, Play) | (Handshaking | Status | Login | Play, Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Status => "status",
            ConnectionState::Login => "login",
            ConnectionState::Play => "play",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Where a connection is within the login state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    AwaitingLoginStart,
    AwaitingEncryptionResponse,
    AwaitingAuthResult,
    Complete,
}

/// Length of the verify token sent in the encryption request.
pub const VERIFY_TOKEN_LEN: usize = 4;

/// Everything known about one client connection.
///
/// Owned by the task driving the connection. Write-once fields refuse a
/// second write.
pub struct Session {
    pub id: SessionId,
    pub peer: SocketAddr,
    state: ConnectionState,
    handshake: Option<Handshake>,
    login_phase: LoginPhase,
    username: Option<String>,
    uuid: Option<Uuid>,
    verify_token: Option<[u8; VERIFY_TOKEN_LEN]>,
    token_checked: bool,
    shared_secret: Option<Vec<u8>>,
    cipher_installed: bool,
}

impl Session {
    pub fn new(id: SessionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: ConnectionState::Handshaking,
            handshake: None,
            login_phase: LoginPhase::AwaitingLoginStart,
            username: None,
            uuid: None,
            verify_token: None,
            token_checked: false,
            shared_secret: None,
            cipher_installed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_advance_to(next) {
            warn!(
                from = self.state.as_str(),
                to = next.as_str(),
                "Ignoring illegal state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
        }
    }

    /// Record the handshake. The domain is captured once.
    pub fn record_handshake(&mut self, handshake: Handshake) -> bool {
        if self.handshake.is_some() {
            return false;
        }
        self.handshake = Some(handshake);
        true
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// Domain the client asked for in its handshake.
    pub fn domain(&self) -> Option<&str> {
        self.handshake.as_ref().map(|h| h.server_address.as_str())
    }

    pub fn protocol_version(&self) -> Option<i32> {
        self.handshake.as_ref().map(|h| h.protocol_version)
    }

    pub fn login_phase(&self) -> LoginPhase {
        self.login_phase
    }

    pub(crate) fn set_login_phase(&mut self, phase: LoginPhase) {
        self.login_phase = phase;
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub(crate) fn set_username(&mut self, username: String) {
        self.username = Some(username);
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    /// Store the verified identity. Only the first call takes effect.
    pub(crate) fn set_identity(&mut self, uuid: Uuid, username: String) {
        if self.uuid.is_none() {
            self.uuid = Some(uuid);
            self.username = Some(username);
        }
    }

    /// Generate the verify token. Returns `None` if one was already issued.
    pub(crate) fn issue_verify_token(&mut self) -> Option<[u8; VERIFY_TOKEN_LEN]> {
        if self.verify_token.is_some() {
            return None;
        }
        let mut token = [0u8; VERIFY_TOKEN_LEN];
        OsRng.fill_bytes(&mut token);
        self.verify_token = Some(token);
        Some(token)
    }

    /// Hand out the issued token for its single comparison.
    pub(crate) fn take_verify_token(&mut self) -> Option<[u8; VERIFY_TOKEN_LEN]> {
        if self.token_checked {
            return None;
        }
        self.token_checked = true;
        self.verify_token
    }

    pub(crate) fn set_shared_secret(&mut self, secret: Vec<u8>) -> bool {
        if self.shared_secret.is_some() {
            return false;
        }
        self.shared_secret = Some(secret);
        true
    }

    pub fn shared_secret(&self) -> Option<&[u8]> {
        self.shared_secret.as_deref()
    }

    pub(crate) fn mark_cipher_installed(&mut self) {
        self.cipher_installed = true;
    }

    pub fn cipher_installed(&self) -> bool {
        self.cipher_installed
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("domain", &self.domain())
            .field("username", &self.username)
            .field("uuid", &self.uuid)
            .field("cipher_installed", &self.cipher_installed)
            .finish_non_exhaustive()
    }
}
