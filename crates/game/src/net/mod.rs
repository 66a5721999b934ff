pub mod bitstream;
pub mod codec;
pub mod quantize;

mod channel;
mod connection;
mod ledger;
mod protocol;
mod simulator;
mod stats;

pub use channel::UdpChannel;
pub use connection::{ConnectionManager, ConnectionState, PeerConnection, TokenBucket};
pub use ledger::PacketLedger;
pub use protocol::{
    decode_direction, quantize_direction, snapshot_sequence_newer, Packet, PacketError,
    PacketHeader, PacketType, PlayerInput, DEFAULT_PORT, DEFAULT_SNAPSHOT_RATE, DEFAULT_TICK_RATE,
    INPUT_SEND_RATE, MAX_PACKET_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
pub use simulator::NetworkSimulator;
pub use stats::{rand_u64, NetworkStats, PacketLossSimulation};
