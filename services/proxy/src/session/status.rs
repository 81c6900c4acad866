//! Status stage: server list query and ping.

use lodestone_protocol::packets::{Ping, Pong, StatusRequest, StatusResponse};
use lodestone_protocol::{Frame, Packet, PacketStream, PROTOCOL_VERSION, VERSION_NAME};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::context::ProxyContext;
use crate::error::SessionError;

#[derive(Debug, Serialize)]
struct StatusDocument<'a> {
    version: VersionInfo<'a>,
    players: PlayerInfo,
    description: Description<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    favicon: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct VersionInfo<'a> {
    name: &'a str,
    protocol: i32,
}

#[derive(Debug, Serialize)]
struct PlayerInfo {
    max: u32,
    online: usize,
}

#[derive(Debug, Serialize)]
struct Description<'a> {
    text: &'a str,
}

/// Render the status response body.
pub async fn status_json(ctx: &ProxyContext) -> String {
    let status = &ctx.settings.status;
    let document = StatusDocument {
        version: VersionInfo {
            name: VERSION_NAME,
            protocol: PROTOCOL_VERSION,
        },
        players: PlayerInfo {
            max: status.max_players,
            online: ctx.registry.count().await,
        },
        description: Description {
            text: &status.description,
        },
        favicon: status.favicon.as_deref(),
    };
    serde_json::to_string(&document).unwrap_or_default()
}

/// Answer one status-state packet. Malformed or unknown packets are dropped.
pub(super) async fn handle<S>(
    frame: &Frame,
    stream: &mut PacketStream<S>,
    ctx: &ProxyContext,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match frame.id() {
        StatusRequest::ID => {
            let json = status_json(ctx).await;
            ctx.stats.record_status();
            stream.write_packet(&StatusResponse { json }).await?;
        }
        Ping::ID => match Ping::decode(frame) {
            Ok(ping) => {
                stream
                    .write_packet(&Pong {
                        payload: ping.payload,
                    })
                    .await?;
            }
            Err(e) => debug!(error = %e, "Dropping malformed ping"),
        },
        other => debug!(packet_id = other, "Dropping unknown status packet"),
    }
    Ok(())
}
