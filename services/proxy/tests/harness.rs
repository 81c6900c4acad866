//! Test harness for proxy integration tests.
//!
//! Provides a mock session server, offline-mode mock backends, a proxy
//! listener on an ephemeral port, and a client that performs the real
//! encrypted login.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use lodestone_protocol::packets::{
    EncryptionRequest, EncryptionResponse, Handshake, KeepAliveClientbound, KeepAliveServerbound,
    LoginDisconnect, LoginStart, LoginSuccess, PlayDisconnect,
};
use lodestone_protocol::{
    encode_frame, Frame, NextState, Packet, PacketBufExt, PacketBufMutExt, PacketStream,
    PROTOCOL_VERSION,
};
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lodestone_proxy::{
    BackendGroup, Listener, ProxyContext, ProxySettings, Registry, SelectionAlgorithm, ServerKey,
    SessionServerClient,
};

pub const HAS_JOINED_PATH: &str = "/session/minecraft/hasJoined";

/// Clientbound packet a mock backend sends right after login.
pub const MARKER_PACKET_ID: i32 = 0x0E;

/// Serverbound chat message.
pub const CHAT_PACKET_ID: i32 = 0x03;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

static SERVER_KEY: LazyLock<Arc<ServerKey>> =
    LazyLock::new(|| Arc::new(ServerKey::generate().expect("generate proxy key")));

/// A frame carrying one string, the way chat-like packets do.
#[allow(dead_code)]
pub fn string_frame(id: i32, text: &str) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_varint(id);
    payload.put_string(text);
    encode_frame(&payload)
}

#[allow(dead_code)]
pub fn frame_string(frame: &Frame) -> String {
    frame.body().get_string(32767).unwrap()
}

// -----------------------------------------------------------------------------
// Session server
// -----------------------------------------------------------------------------

#[allow(dead_code)]
pub struct SessionServer {
    pub server: MockServer,
    pub uuid: Uuid,
}

#[allow(dead_code)]
impl SessionServer {
    /// Vouches for every login as `name`.
    pub async fn accepting(name: &str) -> Self {
        let server = MockServer::start().await;
        let uuid = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(HAS_JOINED_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": uuid.simple().to_string(),
                "name": name,
                "properties": [],
            })))
            .mount(&server)
            .await;
        Self { server, uuid }
    }

    /// Answers 204 No Content, as the real server does for unknown sessions.
    pub async fn rejecting() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HAS_JOINED_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Self {
            server,
            uuid: Uuid::nil(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), HAS_JOINED_PATH)
    }

    pub async fn requests(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }
}

// -----------------------------------------------------------------------------
// Backends
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum BackendBehavior {
    /// Complete the login, send a marker, then echo every frame.
    Accept { marker: String },
    /// Refuse the login with this chat component.
    Reject { reason: String },
}

/// An offline-mode game server.
#[allow(dead_code)]
pub struct MockBackend {
    pub addr: SocketAddr,
    pub marker: String,
    connections: Arc<AtomicU64>,
    logins: Arc<Mutex<Vec<(Handshake, String)>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl MockBackend {
    pub async fn spawn(marker: &str) -> io::Result<Self> {
        Self::spawn_with(BackendBehavior::Accept {
            marker: marker.to_string(),
        })
        .await
    }

    pub async fn spawn_rejecting(reason: &str) -> io::Result<Self> {
        Self::spawn_with(BackendBehavior::Reject {
            reason: reason.to_string(),
        })
        .await
    }

    async fn spawn_with(behavior: BackendBehavior) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let logins = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let marker = match &behavior {
            BackendBehavior::Accept { marker } => marker.clone(),
            BackendBehavior::Reject { .. } => String::new(),
        };
        let conn_clone = Arc::clone(&connections);
        let logins_clone = Arc::clone(&logins);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                tokio::spawn(serve_backend_connection(
                                    stream,
                                    behavior.clone(),
                                    Arc::clone(&logins_clone),
                                ));
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            marker,
            connections,
            logins,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Handshake and username of every login attempt, in order.
    pub fn logins(&self) -> Vec<(Handshake, String)> {
        self.logins.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn serve_backend_connection(
    stream: TcpStream,
    behavior: BackendBehavior,
    logins: Arc<Mutex<Vec<(Handshake, String)>>>,
) -> Option<()> {
    let mut stream = PacketStream::new(stream);
    let frame = stream.read_frame().await.ok()??;
    let handshake = Handshake::decode(&frame).ok()?;
    let frame = stream.read_frame().await.ok()??;
    let login = LoginStart::decode(&frame).ok()?;
    logins
        .lock()
        .unwrap()
        .push((handshake, login.username.clone()));

    match behavior {
        BackendBehavior::Reject { reason } => {
            stream.write_packet(&LoginDisconnect { reason }).await.ok()?;
        }
        BackendBehavior::Accept { marker } => {
            stream
                .write_packet(&LoginSuccess {
                    uuid: Uuid::nil(),
                    username: login.username,
                })
                .await
                .ok()?;
            stream
                .write_raw(&string_frame(MARKER_PACKET_ID, &marker))
                .await
                .ok()?;
            while let Some(frame) = stream.read_frame().await.ok()? {
                stream.write_raw(&frame.to_wire()).await.ok()?;
            }
        }
    }
    Some(())
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[allow(dead_code)]
pub fn group(domains: &[&str], targets: &[SocketAddr], algorithm: SelectionAlgorithm) -> BackendGroup {
    BackendGroup::new(
        domains.iter().map(|d| d.to_string()).collect(),
        targets.iter().map(|t| t.to_string()).collect(),
        algorithm,
    )
}

// -----------------------------------------------------------------------------
// Proxy
// -----------------------------------------------------------------------------

pub struct ProxyHandle {
    pub addr: SocketAddr,
    pub ctx: ProxyContext,
    shutdown: CancellationToken,
}

#[allow(dead_code)]
impl ProxyHandle {
    pub async fn spawn(session_server: &str, groups: Vec<BackendGroup>) -> io::Result<Self> {
        Self::spawn_with(session_server, groups, ProxySettings::default()).await
    }

    pub async fn spawn_with(
        session_server: &str,
        groups: Vec<BackendGroup>,
        settings: ProxySettings,
    ) -> io::Result<Self> {
        let registry = Arc::new(Registry::new());
        for group in groups {
            registry.add_backend_group(group).await;
        }
        let verifier = SessionServerClient::new(session_server, Duration::from_secs(2))
            .map_err(io::Error::other)?;
        let ctx = ProxyContext::new(
            registry,
            Arc::clone(&SERVER_KEY),
            Arc::new(verifier),
            settings,
        );

        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), ctx.clone()).await?;
        let addr = listener.local_addr()?;
        let listener = Arc::new(listener);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        tokio::spawn(async move {
            let _ = listener.run(token).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            ctx,
            shutdown,
        })
    }

    pub async fn online(&self) -> usize {
        self.ctx.registry.count().await
    }

    /// Poll until `expected` sessions are in play, for up to two seconds.
    pub async fn wait_for_online(&self, expected: usize) -> bool {
        for _ in 0..100 {
            if self.online().await == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// -----------------------------------------------------------------------------
// Client
// -----------------------------------------------------------------------------

/// A client that finished login through the proxy.
#[allow(dead_code)]
pub struct TestClient {
    stream: PacketStream<TcpStream>,
    pub uuid: Uuid,
    pub username: String,
    pub shared_secret: [u8; 16],
    pub public_key: Vec<u8>,
}

#[allow(dead_code)]
impl TestClient {
    /// Log in through `proxy` as `username`, asking for `domain`.
    ///
    /// Returns the disconnect reason if the proxy refuses the login.
    pub async fn login(proxy: SocketAddr, domain: &str, username: &str) -> Result<Self, String> {
        let stream = TcpStream::connect(proxy).await.unwrap();
        let mut stream = PacketStream::new(stream);
        stream
            .write_packet(&Handshake {
                protocol_version: PROTOCOL_VERSION,
                server_address: domain.to_string(),
                server_port: proxy.port(),
                next_state: NextState::Login,
            })
            .await
            .unwrap();
        stream
            .write_packet(&LoginStart {
                username: username.to_string(),
            })
            .await
            .unwrap();

        let frame = read_with_timeout(&mut stream).await.expect("encryption request");
        if frame.id() == LoginDisconnect::ID {
            return Err(LoginDisconnect::decode(&frame).unwrap().reason);
        }
        let request = EncryptionRequest::decode(&frame).unwrap();

        let public = RsaPublicKey::from_public_key_der(&request.public_key).unwrap();
        let mut rng = rand::thread_rng();
        let mut shared_secret = [0u8; 16];
        rng.fill_bytes(&mut shared_secret);
        stream
            .write_packet(&EncryptionResponse {
                shared_secret: public
                    .encrypt(&mut rng, Pkcs1v15Encrypt, &shared_secret)
                    .unwrap(),
                verify_token: public
                    .encrypt(&mut rng, Pkcs1v15Encrypt, &request.verify_token)
                    .unwrap(),
            })
            .await
            .unwrap();
        stream.enable_encryption(&shared_secret).unwrap();

        let frame = read_with_timeout(&mut stream).await.expect("login result");
        match frame.id() {
            LoginSuccess::ID => {
                let success = LoginSuccess::decode(&frame).unwrap();
                Ok(Self {
                    stream,
                    uuid: success.uuid,
                    username: success.username,
                    shared_secret,
                    public_key: request.public_key,
                })
            }
            LoginDisconnect::ID => Err(LoginDisconnect::decode(&frame).unwrap().reason),
            other => panic!("unexpected login packet 0x{other:02x}"),
        }
    }

    /// Next frame that is not a proxy keepalive, answering keepalives on the
    /// way. `None` once the proxy closes the connection.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let frame = read_with_timeout(&mut self.stream).await?;
            if frame.id() == KeepAliveClientbound::ID {
                let challenge = KeepAliveClientbound::decode(&frame).unwrap();
                let _ = self
                    .stream
                    .write_packet(&KeepAliveServerbound { id: challenge.id })
                    .await;
                continue;
            }
            return Some(frame);
        }
    }

    /// Next frame of any kind, without answering anything.
    pub async fn next_raw_frame(&mut self) -> Option<Frame> {
        read_with_timeout(&mut self.stream).await
    }

    /// Reason of the play disconnect the proxy sends next.
    pub async fn play_disconnect(&mut self) -> String {
        let frame = self.next_frame().await.expect("play disconnect");
        PlayDisconnect::decode(&frame).unwrap().reason
    }

    pub async fn send_chat(&mut self, text: &str) {
        self.stream
            .write_raw(&string_frame(CHAT_PACKET_ID, text))
            .await
            .unwrap();
    }
}

async fn read_with_timeout(stream: &mut PacketStream<TcpStream>) -> Option<Frame> {
    match timeout(READ_TIMEOUT, stream.read_frame()).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(_)) => None,
        Err(_) => panic!("timed out waiting for a frame"),
    }
}
