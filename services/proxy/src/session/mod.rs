//! Client sessions.
//!
//! One task per accepted connection drives the state machine:
//!
//! ```text
//! Handshaking --next_state=1--> Status  (request/ping until the client leaves)
//!             --next_state=2--> Login --verified--> Play --> backend relay
//! ```
//!
//! Every stage ends the session on error. [`serve`] is the only place that
//! turns an error into what the client sees: a login or play disconnect
//! carrying [`SessionError::disconnect_reason`], or a silent close.

mod handshake;
mod keepalive;
mod login;
mod state;
mod status;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use lodestone_protocol::packets::{LoginDisconnect, LoginSuccess, PlayDisconnect};
use lodestone_protocol::{Packet, PacketReader, PacketStream, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use keepalive::{KeepaliveClock, KeepaliveMonitor, MonitorExit};
pub use state::{ConnectionState, LoginPhase, Session, SessionId, VERIFY_TOKEN_LEN};
pub use status::status_json;

use crate::auth::VerifiedIdentity;
use crate::context::ProxyContext;
use crate::error::{BackendError, SessionError};
use crate::proxy::{ActiveSession, BackendSession, RelayEnd};
use login::LoginStep;

/// Frames queued for the client writer before producers wait.
const OUTBOUND_QUEUE: usize = 256;

/// Bound on writing a final disconnect to a client.
const DISCONNECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Time the client writer gets to flush after the relay ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve one client connection until it ends.
///
/// `token` is cancelled on proxy shutdown and by the keepalive monitor when
/// the client goes silent. Everything before play must finish within the
/// configured login timeout.
pub async fn serve<S>(
    stream: S,
    peer: SocketAddr,
    id: SessionId,
    ctx: ProxyContext,
    token: CancellationToken,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut session = Session::new(id, peer);
    let mut stream = PacketStream::new(stream);

    let pre_play = timeout(
        ctx.settings.login_timeout,
        establish(&mut session, &mut stream, &ctx),
    );
    let established = tokio::select! {
        _ = token.cancelled() => Err(SessionError::Cancelled),
        result = pre_play => result.unwrap_or(Err(SessionError::Timeout)),
    };

    let result = match established {
        Ok(Some(identity)) => play(&mut session, stream, identity, &ctx, &token).await,
        Ok(None) => Ok(()),
        Err(err) => {
            if session.state() == ConnectionState::Login {
                if let Some(reason) = err.disconnect_reason() {
                    send_login_disconnect(&mut stream, reason).await;
                }
            }
            Err(err)
        }
    };

    session.close();
    result
}

/// Run the pre-play states. Returns the verified identity once login
/// completes, or `None` if the client left while that was normal.
async fn establish<S>(
    session: &mut Session,
    stream: &mut PacketStream<S>,
    ctx: &ProxyContext,
) -> Result<Option<VerifiedIdentity>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(frame) = stream.read_frame().await? else {
            return match session.state() {
                ConnectionState::Handshaking | ConnectionState::Status => Ok(None),
                _ => Err(SessionError::ClientClosed),
            };
        };

        match session.state() {
            ConnectionState::Handshaking => handshake::handle(session, &frame),
            ConnectionState::Status => status::handle(&frame, stream, ctx).await?,
            ConnectionState::Login => {
                if let LoginStep::Authenticated(identity) =
                    login::handle(session, &frame, stream, ctx).await?
                {
                    return Ok(Some(identity));
                }
            }
            ConnectionState::Play | ConnectionState::Closed => return Ok(None),
        }
    }
}

async fn send_login_disconnect<S>(stream: &mut PacketStream<S>, reason: String)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let disconnect = LoginDisconnect { reason };
    match timeout(DISCONNECT_WRITE_TIMEOUT, stream.write_packet(&disconnect)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Failed to send login disconnect"),
        Err(_) => debug!("Timed out sending login disconnect"),
    }
}

/// Enter play and relay to a backend until either side is done.
async fn play<S>(
    session: &mut Session,
    mut stream: PacketStream<S>,
    identity: VerifiedIdentity,
    ctx: &ProxyContext,
    token: &CancellationToken,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    session.set_identity(identity.uuid, identity.name.clone());
    stream
        .write_packet(&LoginSuccess {
            uuid: identity.uuid,
            username: identity.name.clone(),
        })
        .await?;
    session.advance(ConnectionState::Play);

    let domain = session.domain().unwrap_or_default().to_string();
    ctx.registry
        .add_session(ActiveSession {
            id: session.id,
            username: identity.name.clone(),
            uuid: identity.uuid,
            domain: domain.clone(),
            peer: session.peer,
            since: SystemTime::now(),
        })
        .await;
    ctx.stats.record_login();
    info!(
        username = %identity.name,
        uuid = %identity.uuid,
        domain = %domain,
        "Player entered play"
    );

    let result = relay_session(session, stream, ctx, token).await;

    ctx.registry.remove_session(session.id).await;
    result
}

async fn relay_session<S>(
    session: &Session,
    stream: PacketStream<S>,
    ctx: &ProxyContext,
    token: &CancellationToken,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = stream.into_split();
    let (outbound, mut queued) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);

    // Single writer for the client socket; the relay and the keepalive
    // monitor both feed it through the queue.
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = queued.recv().await {
            if let Err(e) = writer.write_raw(&frame).await {
                debug!(error = %e, "Client write failed");
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    let clock = Arc::new(KeepaliveClock::new());
    let monitor = KeepaliveMonitor::spawn(
        Arc::clone(&clock),
        outbound.clone(),
        ctx.settings.keepalive,
        token.clone(),
    );

    let result = tokio::select! {
        _ = token.cancelled() => Err(SessionError::Cancelled),
        result = proxy(session, &mut reader, outbound.clone(), &clock, ctx) => result,
    };
    token.cancel();

    let result = match (result, monitor.stop().await) {
        (Err(SessionError::Cancelled), MonitorExit::TimedOut) => Err(SessionError::Timeout),
        (result, _) => result,
    };

    if let Err(err) = &result {
        if let Some(reason) = err.disconnect_reason() {
            let _ = outbound.try_send(PlayDisconnect { reason }.to_frame());
        }
    }
    drop(outbound);

    let abort = writer_task.abort_handle();
    if timeout(WRITER_DRAIN_TIMEOUT, writer_task).await.is_err() {
        debug!("Client writer did not drain in time");
        abort.abort();
    }
    result
}

/// Select a target for the session's domain, log in there and relay.
async fn proxy<R>(
    session: &Session,
    client: &mut PacketReader<R>,
    outbound: mpsc::Sender<Bytes>,
    clock: &KeepaliveClock,
    ctx: &ProxyContext,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let domain = session.domain().unwrap_or_default();
    let group = ctx
        .registry
        .resolve_group(domain)
        .await
        .map_err(|e| e.into_backend_error(domain))?;
    let target = group.select().map_err(|e| e.into_backend_error(domain))?;

    let mut backend =
        match BackendSession::connect(target, ctx.settings.backend_connect_timeout).await {
            Ok(backend) => {
                ctx.stats.backend_connected.fetch_add(1, Ordering::Relaxed);
                backend
            }
            Err(e) => {
                ctx.stats.backend_failed.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

    let handshake = session
        .handshake()
        .ok_or(SessionError::Protocol(ProtocolError::Truncated("handshake")))?;
    let username = session.username().unwrap_or_default();
    let login_timeout = ctx.settings.backend_connect_timeout;
    match timeout(login_timeout, backend.login(handshake, username)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(BackendError::Handshake(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "backend login timed out",
            )))
            .into())
        }
    }
    info!(target = %target, "Relaying to backend");

    match backend.relay(client, outbound, clock, &ctx.stats).await? {
        RelayEnd::ClientClosed => debug!("Client left"),
        RelayEnd::BackendClosed => debug!(target = %target, "Backend closed connection"),
    }
    Ok(())
}
