use glam::Vec2;
use rkyv::{rancor, Archive, Deserialize, Serialize};

/// MTU budget for any single datagram, snapshot payloads included.
pub const MAX_PACKET_SIZE: usize = 1400;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x534B_524D; // "SKRM"
pub const DEFAULT_PORT: u16 = 27100;
pub const DEFAULT_TICK_RATE: u32 = 30;
pub const DEFAULT_SNAPSHOT_RATE: u32 = 15;
/// Client input RPC cadence, Hz.
pub const INPUT_SEND_RATE: u32 = 20;

/// Envelope prefix on every datagram. The wire-level `sequence`/`ack` pair
/// belongs to the transport (RTT, duplicate filtering); the snapshot stream
/// runs its own u16 sequence inside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32, ack: u32, ack_bitfield: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
            ack,
            ack_bitfield,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

/// Circular "more recent" for the snapshot stream's u16 sequences:
/// `(a − b) mod 65536 < 32768`, excluding equality.
#[inline]
pub fn snapshot_sequence_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

/// Player intent on the wire. The direction is quantized to a signed byte
/// per axis; the client predicts with the decoded value so both ends apply
/// bit-identical input.
#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerInput {
    pub tick: u32,
    pub direction: [i8; 2],
    pub render_time_ms: u32,
    /// Snapshot ack riding along: the newest snapshot sequence the client
    /// holds, 0 if none yet.
    pub last_received_sequence: u16,
}

impl PlayerInput {
    pub fn new(tick: u32, direction: Vec2, render_time_ms: u32, last_received_sequence: u16) -> Self {
        Self {
            tick,
            direction: quantize_direction(direction),
            render_time_ms,
            last_received_sequence,
        }
    }

    pub fn direction_vec(&self) -> Vec2 {
        decode_direction(self.direction)
    }
}

pub fn quantize_direction(direction: Vec2) -> [i8; 2] {
    [
        (direction.x.clamp(-1.0, 1.0) * 127.0) as i8,
        (direction.y.clamp(-1.0, 1.0) * 127.0) as i8,
    ]
}

pub fn decode_direction(direction: [i8; 2]) -> Vec2 {
    Vec2::new(direction[0] as f32 / 127.0, direction[1] as f32 / 127.0)
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    ConnectionRequest {
        client_salt: u64,
    },
    ConnectionChallenge {
        server_salt: u64,
        challenge: u64,
    },
    ChallengeResponse {
        combined_salt: u64,
    },
    ConnectionAccepted {
        peer_id: u32,
        entity_id: u32,
    },
    ConnectionDenied {
        reason: String,
    },
    PlayerInput(PlayerInput),
    /// Bit-packed snapshot payload (see `net::codec`), unreliable.
    Snapshot(Vec<u8>),
    /// Reliable keyframe demand; the client repeats it while starved.
    RequestFullSnapshot,
    ClockSyncRequest {
        client_send_time_ms: u32,
    },
    ClockSyncReply {
        client_send_time_ms: u32,
        server_receive_time_ms: u32,
        server_send_time_ms: u32,
    },
    FireShot {
        origin: [f32; 2],
        direction: [f32; 2],
        client_time_ms: u32,
    },
    ShotHit {
        entity_id: u32,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Disconnect,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)
    }
}
