//! Handshake stage.

use lodestone_protocol::packets::Handshake;
use lodestone_protocol::{Frame, NextState, Packet};
use tracing::debug;

use super::state::{ConnectionState, Session};

/// Apply the client's handshake.
///
/// Malformed packets are dropped without a state change; the client may
/// retry or give up.
pub(super) fn handle(session: &mut Session, frame: &Frame) {
    let handshake = match Handshake::decode(frame) {
        Ok(handshake) => handshake,
        Err(e) => {
            debug!(error = %e, "Dropping malformed handshake");
            return;
        }
    };

    let next = match handshake.next_state {
        NextState::Status => ConnectionState::Status,
        NextState::Login => ConnectionState::Login,
    };
    debug!(
        protocol_version = handshake.protocol_version,
        domain = %handshake.server_address,
        port = handshake.server_port,
        next_state = next.as_str(),
        "Handshake received"
    );
    if session.record_handshake(handshake) {
        session.advance(next);
    }
}
