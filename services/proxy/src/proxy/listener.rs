//! TCP listener and per-connection task spawning.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::context::ProxyContext;
use crate::error::SessionError;
use crate::session::{self, SessionId};

/// Process-wide counters.
#[derive(Debug, Default)]
pub struct ProxyStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently open.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Status requests answered.
    pub status_requests: AtomicU64,
    /// Logins that reached play.
    pub logins: AtomicU64,
    /// Backend dials that succeeded.
    pub backend_connected: AtomicU64,
    /// Backend dials that failed.
    pub backend_failed: AtomicU64,
    /// Bytes relayed to backends.
    pub bytes_to_backend: AtomicU64,
    /// Bytes relayed from backends.
    pub bytes_from_backend: AtomicU64,
}

impl ProxyStats {
    pub fn record_status(&self) {
        self.status_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_login(&self) {
        self.logins.fetch_add(1, Ordering::Relaxed);
    }
}

/// Accepts client connections and runs one session task per connection.
pub struct Listener {
    listener: TcpListener,
    ctx: ProxyContext,
}

impl Listener {
    pub async fn bind(bind_addr: SocketAddr, ctx: ProxyContext) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener bound");
        Ok(Self { listener, ctx })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.ctx.stats
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Every session gets a child of `shutdown`, so cancelling it also ends
    /// the sessions in flight.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(bind_addr = %local_addr, "Listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let stats = Arc::clone(&self.ctx.stats);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                    }

                    stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                    stats.connections_active.fetch_add(1, Ordering::Relaxed);

                    let id = SessionId::next();
                    let ctx = self.ctx.clone();
                    let token = shutdown.child_token();

                    tokio::spawn(
                        async move {
                            debug!("Connection accepted");
                            let result = session::serve(stream, peer_addr, id, ctx, token).await;
                            log_outcome(result);

                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                        }
                        .instrument(tracing::info_span!(
                            "connection",
                            peer = %peer_addr,
                            session_id = %id
                        )),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

fn log_outcome(result: Result<(), SessionError>) {
    let err = match result {
        Ok(()) => {
            debug!("Connection closed");
            return;
        }
        Err(err) => err,
    };

    if err.is_benign() {
        debug!(kind = err.kind(), error = %err, "Connection closed");
        return;
    }
    match &err {
        SessionError::Protocol(_) => {
            debug!(kind = err.kind(), error = %err, "Connection closed on protocol error")
        }
        _ => warn!(kind = err.kind(), error = %err, "Session ended with error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, StaticVerifier};
    use lodestone_protocol::packets::{Handshake, StatusRequest, StatusResponse};
    use lodestone_protocol::{NextState, Packet, PacketStream};
    use tokio::net::TcpStream;

    async fn spawn_listener() -> (Arc<Listener>, SocketAddr, CancellationToken) {
        let ctx = testing::context(StaticVerifier::accept("Foo"));
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), ctx)
            .await
            .unwrap();
        let listener = Arc::new(listener);
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(Arc::clone(&listener).run(shutdown.clone()));
        (listener, addr, shutdown)
    }

    async fn query_status(addr: SocketAddr) -> StatusResponse {
        let mut client = PacketStream::new(TcpStream::connect(addr).await.unwrap());
        client
            .write_packet(&Handshake {
                protocol_version: 754,
                server_address: "a.example".into(),
                server_port: addr.port(),
                next_state: NextState::Status,
            })
            .await
            .unwrap();
        client.write_packet(&StatusRequest).await.unwrap();
        let frame = client.read_frame().await.unwrap().unwrap();
        StatusResponse::decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_accepts_and_counts() {
        let (listener, addr, shutdown) = spawn_listener().await;

        query_status(addr).await;
        query_status(addr).await;

        let stats = listener.stats();
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.status_requests.load(Ordering::Relaxed), 2);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (listener, addr, shutdown) = spawn_listener().await;
        drop(listener);
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
