use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::ledger::PacketLedger;
use super::protocol::{snapshot_sequence_newer, Packet, PacketHeader, PacketType};
use super::stats::{rand_u64, PacketLossSimulation};
use crate::simulation::InputCommand;
use crate::snapshot::{Snapshot, SnapshotHistory};
use crate::world::EntityId;

const MAX_PENDING_INPUTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ChallengeResponse,
    Connected,
}

/// Simple token bucket; used to keep one chatty peer from flooding the
/// input queue past its configured send rate.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f32,
    capacity: f32,
    refill_per_sec: f32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_hz: f32, burst: f32) -> Self {
        Self {
            tokens: burst,
            capacity: burst,
            refill_per_sec: rate_hz,
            last_refill: Instant::now(),
        }
    }

    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Server-side state for one peer: transport bookkeeping plus the peer's
/// snapshot stream (sequence allocation, ack, baseline history, queued
/// inputs).
#[derive(Debug)]
pub struct PeerConnection {
    pub addr: SocketAddr,
    pub peer_id: u32,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub entity_id: Option<EntityId>,
    pub last_receive_time: Instant,
    pub packet_loss_sim: PacketLossSimulation,
    ledger: PacketLedger,

    next_snapshot_sequence: u16,
    last_snapshot_ack: u16,
    pub history: SnapshotHistory,
    pending_inputs: VecDeque<InputCommand>,
    last_input_tick: u32,
    force_keyframe: bool,
    input_limiter: TokenBucket,
}

impl PeerConnection {
    pub fn new(
        addr: SocketAddr,
        peer_id: u32,
        client_salt: u64,
        history_size: usize,
        input_rate_hz: u32,
    ) -> Self {
        Self {
            addr,
            peer_id,
            state: ConnectionState::Connecting,
            client_salt,
            server_salt: rand_u64(),
            entity_id: None,
            last_receive_time: Instant::now(),
            packet_loss_sim: PacketLossSimulation::default(),
            ledger: PacketLedger::new(),
            next_snapshot_sequence: 0,
            last_snapshot_ack: 0,
            history: SnapshotHistory::new(history_size),
            pending_inputs: VecDeque::with_capacity(MAX_PENDING_INPUTS),
            last_input_tick: 0,
            force_keyframe: false,
            input_limiter: TokenBucket::new(input_rate_hz as f32, input_rate_hz as f32 * 2.0),
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    /// Stamps the next wire sequence and this peer's ack state on a payload.
    pub fn make_packet(&mut self, payload: PacketType) -> Packet {
        self.ledger.stamp(payload)
    }

    /// Admits an incoming datagram header for this peer: replay filtering
    /// plus ack bookkeeping. A fresh packet also refreshes the timeout.
    pub fn note_packet(&mut self, header: &PacketHeader) -> bool {
        let fresh = self.ledger.accept(header);
        if fresh {
            self.touch();
        }
        fresh
    }

    /// Next snapshot sequence for this peer. 0 is reserved for "no
    /// baseline", so the counter wraps 65535 → 1.
    pub fn allocate_snapshot_sequence(&mut self) -> u16 {
        self.next_snapshot_sequence = if self.next_snapshot_sequence == u16::MAX {
            1
        } else {
            self.next_snapshot_sequence + 1
        };
        self.next_snapshot_sequence
    }

    /// Records a snapshot ack from the peer; stale acks are ignored.
    pub fn acknowledge_snapshot(&mut self, sequence: u16) {
        if sequence == 0 {
            return;
        }
        if self.last_snapshot_ack == 0
            || snapshot_sequence_newer(sequence, self.last_snapshot_ack)
        {
            self.last_snapshot_ack = sequence;
        }
    }

    pub fn last_snapshot_ack(&self) -> u16 {
        self.last_snapshot_ack
    }

    /// The baseline for the next snapshot build: the acked entry, unless a
    /// keyframe was demanded or the entry has been evicted.
    pub fn baseline_for_build(&self) -> Option<&Snapshot> {
        if self.force_keyframe || self.last_snapshot_ack == 0 {
            return None;
        }
        self.history.get(self.last_snapshot_ack)
    }

    pub fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    /// Called once the keyframe (or any snapshot) for this build is out the
    /// door.
    pub fn finish_snapshot_build(&mut self, snapshot: Snapshot) {
        self.force_keyframe = false;
        self.history.insert(snapshot);
    }

    /// Queues an input, subject to the rate limit. Returns false when the
    /// command was dropped.
    pub fn queue_input(&mut self, command: InputCommand) -> bool {
        if !self.input_limiter.allow() {
            return false;
        }
        if self.pending_inputs.len() >= MAX_PENDING_INPUTS {
            self.pending_inputs.pop_front();
        }
        self.last_input_tick = self.last_input_tick.max(command.tick);
        self.pending_inputs.push_back(command);
        true
    }

    /// Drains the queue and keeps only the most recent command by tick —
    /// the one the next simulation step applies.
    pub fn take_latest_input(&mut self) -> Option<InputCommand> {
        let mut latest: Option<InputCommand> = None;
        while let Some(command) = self.pending_inputs.pop_front() {
            if latest.map_or(true, |l| command.tick >= l.tick) {
                latest = Some(command);
            }
        }
        latest
    }

    pub fn last_input_tick(&self) -> u32 {
        self.last_input_tick
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    peers_by_addr: HashMap<SocketAddr, u32>,
    peers: HashMap<u32, PeerConnection>,
    next_peer_id: u32,
    max_peers: usize,
    timeout: Duration,
    history_size: usize,
    input_rate_hz: u32,
}

impl ConnectionManager {
    pub fn new(
        max_peers: usize,
        timeout: Duration,
        history_size: usize,
        input_rate_hz: u32,
    ) -> Self {
        Self {
            peers_by_addr: HashMap::new(),
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
            timeout,
            history_size,
            input_rate_hz,
        }
    }

    pub fn get_or_create_pending(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
    ) -> Result<&mut PeerConnection, &'static str> {
        if let Some(&peer_id) = self.peers_by_addr.get(&addr) {
            return Ok(self.peers.get_mut(&peer_id).unwrap());
        }

        if self.peers.len() >= self.max_peers {
            return Err("server full");
        }

        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;

        let connection = PeerConnection::new(
            addr,
            peer_id,
            client_salt,
            self.history_size,
            self.input_rate_hz,
        );
        self.peers.insert(peer_id, connection);
        self.peers_by_addr.insert(addr, peer_id);

        Ok(self.peers.get_mut(&peer_id).unwrap())
    }

    pub fn get(&self, peer_id: u32) -> Option<&PeerConnection> {
        self.peers.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: u32) -> Option<&mut PeerConnection> {
        self.peers.get_mut(&peer_id)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&PeerConnection> {
        self.peers_by_addr.get(addr).and_then(|id| self.peers.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerConnection> {
        if let Some(&id) = self.peers_by_addr.get(addr) {
            self.peers.get_mut(&id)
        } else {
            None
        }
    }

    pub fn remove(&mut self, peer_id: u32) -> Option<PeerConnection> {
        let connection = self.peers.remove(&peer_id)?;
        self.peers_by_addr.remove(&connection.addr);
        Some(connection)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<PeerConnection> {
        let peer_id = self.peers_by_addr.remove(addr)?;
        self.peers.remove(&peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerConnection> {
        self.peers.values_mut()
    }

    pub fn peer_ids(&self) -> Vec<u32> {
        self.peers.keys().copied().collect()
    }

    /// Removes and returns every peer silent past the timeout, so the
    /// caller can despawn their entities and report the disconnects.
    pub fn cleanup_timed_out(&mut self) -> Vec<PeerConnection> {
        let timed_out: Vec<u32> = self
            .peers
            .iter()
            .filter(|(_, c)| c.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.peers.len()
    }
}
