//! Lodestone: a protocol-aware reverse proxy for Minecraft: Java Edition.
//!
//! The proxy terminates the client's login itself (key exchange and session
//! server verification), then routes the player by the domain from the
//! handshake to a backend running in offline mode and relays the encrypted
//! play stream.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod keys;
pub mod proxy;
pub mod session;

#[cfg(test)]
mod testing;

pub use auth::{SessionServerClient, SessionVerifier, VerifiedIdentity};
pub use config::Config;
pub use context::{KeepaliveSettings, ProxyContext, ProxySettings, StatusSettings};
pub use error::{AuthError, BackendError, CryptoError, SessionError};
pub use keys::ServerKey;
pub use proxy::{BackendGroup, Listener, ProxyStats, Registry, SelectionAlgorithm};
