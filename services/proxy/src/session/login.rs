//! Login stage: key exchange and session verification.
//!
//! ```text
//! client                         proxy                      session server
//!   | LoginStart{name}             |                               |
//!   |----------------------------->|                               |
//!   |   EncryptionRequest{id,key,token}                            |
//!   |<-----------------------------|                               |
//!   | EncryptionResponse{rsa(secret), rsa(token)}                  |
//!   |----------------------------->| check token, enable cipher    |
//!   |                              |-- hasJoined(name, hash) ----->|
//!   |                              |<------------- 200 profile ----|
//! ```
//!
//! Nothing is retried. Any failure ends the session.

use lodestone_protocol::packets::{EncryptionRequest, EncryptionResponse, LoginStart};
use lodestone_protocol::{session_hash, Frame, Packet, PacketStream, ProtocolError, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use super::state::{LoginPhase, Session};
use crate::auth::VerifiedIdentity;
use crate::context::ProxyContext;
use crate::error::{AuthError, CryptoError, SessionError};
use crate::keys::verify_token_matches;

/// Outcome of one login packet.
#[derive(Debug)]
pub(super) enum LoginStep {
    /// Waiting for the next client packet.
    Continue,
    /// The session server vouched for the client.
    Authenticated(VerifiedIdentity),
}

pub(super) async fn handle<S>(
    session: &mut Session,
    frame: &Frame,
    stream: &mut PacketStream<S>,
    ctx: &ProxyContext,
) -> Result<LoginStep, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match session.login_phase() {
        LoginPhase::AwaitingLoginStart => {
            on_login_start(session, frame, stream, ctx).await?;
            Ok(LoginStep::Continue)
        }
        LoginPhase::AwaitingEncryptionResponse => {
            let identity = on_encryption_response(session, frame, stream, ctx).await?;
            Ok(LoginStep::Authenticated(identity))
        }
        // Verification runs inside the encryption response handler, so a
        // packet here arrived after login already finished.
        LoginPhase::AwaitingAuthResult | LoginPhase::Complete => {
            Err(SessionError::Protocol(ProtocolError::UnexpectedPacket {
                expected: EncryptionResponse::ID,
                actual: frame.id(),
            }))
        }
    }
}

async fn on_login_start<S>(
    session: &mut Session,
    frame: &Frame,
    stream: &mut PacketStream<S>,
    ctx: &ProxyContext,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let login_start = LoginStart::decode(frame)?;

    let version = session.protocol_version().unwrap_or_default();
    if version != PROTOCOL_VERSION {
        return Err(SessionError::UnsupportedVersion(version));
    }

    debug!(username = %login_start.username, "Login started");
    session.set_username(login_start.username);

    let verify_token = session
        .issue_verify_token()
        .ok_or_else(|| {
            SessionError::Protocol(ProtocolError::UnexpectedPacket {
                expected: EncryptionResponse::ID,
                actual: frame.id(),
            })
        })?;

    stream
        .write_packet(&EncryptionRequest {
            server_id: ctx.settings.server_id.clone(),
            public_key: ctx.server_key.public_key_der().to_vec(),
            verify_token: verify_token.to_vec(),
        })
        .await?;
    session.set_login_phase(LoginPhase::AwaitingEncryptionResponse);
    Ok(())
}

async fn on_encryption_response<S>(
    session: &mut Session,
    frame: &Frame,
    stream: &mut PacketStream<S>,
    ctx: &ProxyContext,
) -> Result<VerifiedIdentity, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = EncryptionResponse::decode(frame)?;

    let shared_secret = ctx
        .server_key
        .decrypt(&response.shared_secret)
        .map_err(|_| CryptoError::Decrypt {
            field: "shared secret",
        })?;
    let echoed_token = ctx
        .server_key
        .decrypt(&response.verify_token)
        .map_err(|_| CryptoError::Decrypt {
            field: "verify token",
        })?;

    let Some(expected) = session.take_verify_token() else {
        return Err(AuthError::VerifyTokenMismatch.into());
    };
    if !verify_token_matches(&expected, &echoed_token) {
        return Err(AuthError::VerifyTokenMismatch.into());
    }

    // Everything we send from here on must be encrypted, including a
    // "bad auth" disconnect.
    stream
        .enable_encryption(&shared_secret)
        .map_err(CryptoError::from)?;
    session.mark_cipher_installed();
    session.set_login_phase(LoginPhase::AwaitingAuthResult);

    let server_hash = session_hash(
        &ctx.settings.server_id,
        &shared_secret,
        ctx.server_key.public_key_der(),
    );
    session.set_shared_secret(shared_secret);

    let username = session.username().unwrap_or_default().to_string();
    let client_ip = ctx
        .settings
        .prevent_proxy_connections
        .then(|| session.peer.ip());
    let identity = ctx
        .verifier
        .has_joined(&username, &server_hash, client_ip)
        .await?;

    session.set_login_phase(LoginPhase::Complete);
    info!(username = %identity.name, uuid = %identity.uuid, "Session verified");
    Ok(identity)
}
