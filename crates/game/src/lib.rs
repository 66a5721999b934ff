pub mod lagcomp;
pub mod net;
pub mod physics;
pub mod simulation;
pub mod snapshot;
pub mod world;

pub use lagcomp::{LagCompensation, HIT_RADIUS};
pub use net::{
    ConnectionManager, ConnectionState, NetworkSimulator, NetworkStats, Packet, PacketError,
    PacketHeader, PacketLedger, PacketLossSimulation, PacketType, PeerConnection, PlayerInput,
    UdpChannel, DEFAULT_PORT, DEFAULT_SNAPSHOT_RATE, DEFAULT_TICK_RATE, INPUT_SEND_RATE,
    MAX_PACKET_SIZE,
};
pub use physics::{Collider, ColliderShape, KinematicPhysics, PhysicsEngine};
pub use simulation::{FixedTimestep, InputCommand, PLAYER_SPEED};
pub use snapshot::{EntityState, Snapshot, SnapshotBuffer, SnapshotHeader, SnapshotHistory};
pub use world::{
    Entity, EntityId, EntityKind, InterestConfig, InterestManager, World, CHUNK_SIZE,
};
