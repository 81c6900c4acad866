//! Backend session and relay.
//!
//! Once a client is authenticated the proxy dials the selected target,
//! replays the client's handshake and logs in on its behalf (the backend
//! runs in offline mode behind the proxy), then relays whole frames in both
//! directions until either side stops.
//!
//! ```text
//! client reader --frames--> [keepalive reply filter] --> backend writer
//! backend reader --frames--> outbound queue --> client writer task
//! ```

use std::io;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use lodestone_protocol::packets::{
    EncryptionRequest, Handshake, KeepAliveServerbound, LoginDisconnect, LoginPluginRequest,
    LoginPluginResponse, LoginStart, LoginSuccess, SetCompression,
};
use lodestone_protocol::{NextState, Packet, PacketReader, PacketStream, ProtocolError};
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::listener::ProxyStats;
use crate::error::BackendError;
use crate::session::KeepaliveClock;

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Which side ended a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    BackendClosed,
}

/// Connection to one backend target.
pub struct BackendSession {
    target: String,
    stream: PacketStream<TcpStream>,
}

impl BackendSession {
    /// Dial `target` within `connect_timeout`.
    pub async fn connect(target: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let dial_error = |source: io::Error| BackendError::Dial {
            target: target.to_string(),
            source,
        };
        let stream = match timeout(connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(dial_error(e)),
            Err(_) => {
                return Err(dial_error(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connect timeout",
                )))
            }
        };
        stream.set_nodelay(true).map_err(dial_error)?;
        debug!(target = %target, "Connected to backend");
        Ok(Self {
            target: target.to_string(),
            stream: PacketStream::new(stream),
        })
    }

    /// Replay the client's handshake and complete an offline-mode login as
    /// `username`.
    pub async fn login(&mut self, handshake: &Handshake, username: &str) -> Result<(), BackendError> {
        let replay = Handshake {
            next_state: NextState::Login,
            ..handshake.clone()
        };
        self.stream
            .write_packet(&replay)
            .await
            .map_err(BackendError::Handshake)?;
        self.stream
            .write_packet(&LoginStart {
                username: username.to_string(),
            })
            .await
            .map_err(BackendError::Handshake)?;

        loop {
            let frame = self
                .stream
                .read_frame()
                .await
                .map_err(BackendError::Handshake)?
                .ok_or(BackendError::Handshake(ProtocolError::UnexpectedEof))?;

            match frame.id() {
                LoginSuccess::ID => {
                    let success = LoginSuccess::decode(&frame).map_err(BackendError::Handshake)?;
                    debug!(
                        target = %self.target,
                        backend_uuid = %success.uuid,
                        "Backend login complete"
                    );
                    return Ok(());
                }
                LoginDisconnect::ID => {
                    let disconnect =
                        LoginDisconnect::decode(&frame).map_err(BackendError::Handshake)?;
                    return Err(BackendError::Rejected {
                        reason: disconnect.reason,
                    });
                }
                LoginPluginRequest::ID => {
                    let request =
                        LoginPluginRequest::decode(&frame).map_err(BackendError::Handshake)?;
                    debug!(channel = %request.channel, "Declining backend plugin request");
                    self.stream
                        .write_packet(&LoginPluginResponse::not_understood(request.message_id))
                        .await
                        .map_err(BackendError::Handshake)?;
                }
                EncryptionRequest::ID => {
                    warn!(target = %self.target, "Backend is in online mode; set online-mode=false behind the proxy");
                    return Err(BackendError::Unsupported("online-mode authentication"));
                }
                SetCompression::ID => {
                    warn!(target = %self.target, "Backend enabled compression; set network-compression-threshold=-1");
                    return Err(BackendError::Unsupported("compression"));
                }
                other => {
                    return Err(BackendError::Handshake(ProtocolError::UnexpectedPacket {
                        expected: LoginSuccess::ID,
                        actual: other,
                    }))
                }
            }
        }
    }

    /// Relay frames until either side closes or fails.
    ///
    /// Serverbound keepalive replies to the proxy's own challenges are
    /// consumed here and refresh `clock`; everything else passes through.
    pub async fn relay<R>(
        self,
        client: &mut PacketReader<R>,
        outbound: mpsc::Sender<Bytes>,
        clock: &KeepaliveClock,
        stats: &ProxyStats,
    ) -> Result<RelayEnd, BackendError>
    where
        R: AsyncRead + Unpin,
    {
        let (mut backend_reader, mut backend_writer) = self.stream.into_split();

        let upstream = async {
            while let Some(frame) = client.read_frame().await.map_err(BackendError::Relay)? {
                if frame.id() == KeepAliveServerbound::ID {
                    if let Ok(reply) = KeepAliveServerbound::decode(&frame) {
                        if clock.acknowledge(reply.id) {
                            continue;
                        }
                    }
                }
                let wire = frame.to_wire();
                backend_writer
                    .write_raw(&wire)
                    .await
                    .map_err(BackendError::Relay)?;
                stats
                    .bytes_to_backend
                    .fetch_add(wire.len() as u64, Ordering::Relaxed);
            }
            Ok::<_, BackendError>(RelayEnd::ClientClosed)
        };

        let downstream = async {
            while let Some(frame) = backend_reader
                .read_frame()
                .await
                .map_err(BackendError::Relay)?
            {
                let wire = frame.to_wire();
                let len = wire.len() as u64;
                if outbound.send(wire).await.is_err() {
                    return Ok(RelayEnd::ClientClosed);
                }
                stats.bytes_from_backend.fetch_add(len, Ordering::Relaxed);
            }
            Ok::<_, BackendError>(RelayEnd::BackendClosed)
        };

        // Whichever side finishes first ends the pairing; the other future
        // is dropped along with its half of the backend socket.
        tokio::select! {
            end = upstream => end,
            end = downstream => end,
        }
    }
}
