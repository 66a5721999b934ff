use std::net::SocketAddr;

use skirmish::world::EntityId;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    PeerConnecting {
        addr: SocketAddr,
    },
    PeerConnected {
        peer_id: u32,
        addr: SocketAddr,
        entity_id: EntityId,
    },
    PeerDisconnected {
        peer_id: u32,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    ShotConfirmed {
        peer_id: u32,
        target: EntityId,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
        }
    }
}
