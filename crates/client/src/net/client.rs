use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::Vec2;

use skirmish::net::codec::{self, CodecError};
use skirmish::snapshot::{Snapshot, SnapshotBuffer};
use skirmish::world::EntityId;
use skirmish::{
    ConnectionState, KinematicPhysics, NetworkStats, PacketLedger, PacketType, PlayerInput,
    UdpChannel,
};

use super::clock::ClockSync;
use super::config::ClientConfig;
use super::interpolation::{InterpolatedEntity, InterpolationConfig, Interpolator};
use super::prediction::{PredictionConfig, PredictionController};

/// Ticks the prediction loop may catch up in one frame before it gives up
/// and waits for the clock to settle.
const MAX_CATCHUP_TICKS: u32 = 8;
/// Minimum spacing between keyframe demands.
const KEYFRAME_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct ClientNetStats {
    pub snapshots_received: u64,
    pub snapshots_duplicate: u64,
    pub decode_failures: u64,
    pub baseline_mismatches: u64,
    pub keyframes_requested: u64,
}

/// The client side of the protocol: handshake, snapshot intake, clock sync,
/// interpolation and prediction, driven by one `update` call per frame.
pub struct GameClient {
    channel: UdpChannel,
    ledger: PacketLedger,
    server_addr: Option<SocketAddr>,
    config: ClientConfig,
    state: ConnectionState,
    peer_id: Option<u32>,
    entity_id: Option<EntityId>,
    client_salt: u64,

    buffer: SnapshotBuffer,
    clock: ClockSync,
    interpolator: Interpolator,
    prediction: PredictionController,
    last_received_sequence: u16,

    input_interval: Duration,
    last_input_send: Instant,
    clock_interval: Duration,
    last_clock_sync: Instant,
    last_snapshot_time: Instant,
    last_server_packet: Instant,
    last_keyframe_request: Instant,
    connection_start: Option<Instant>,
    last_connect_attempt: Instant,
    stats: ClientNetStats,
}

impl GameClient {
    pub fn new(config: ClientConfig) -> io::Result<Self> {
        let channel = UdpChannel::open("0.0.0.0:0")?;

        let interpolator = Interpolator::new(InterpolationConfig {
            interpolation_delay_ms: config.interpolation_delay_ms,
            jitter_buffer_ms: config.jitter_buffer_ms,
            snapshot_rate: config.snapshot_rate,
        });
        let prediction = PredictionController::new(
            PredictionConfig {
                tick_rate: config.server_tick_rate,
                reconcile_threshold: config.reconcile_threshold,
                history_ticks: config.server_tick_rate as usize * 2,
            },
            KinematicPhysics::standard_arena(),
        );

        let now = Instant::now();
        Ok(Self {
            channel,
            ledger: PacketLedger::new(),
            server_addr: None,
            state: ConnectionState::Disconnected,
            peer_id: None,
            entity_id: None,
            client_salt: skirmish::net::rand_u64(),
            buffer: SnapshotBuffer::new(config.snapshot_rate as usize * 2),
            clock: ClockSync::new(),
            interpolator,
            prediction,
            last_received_sequence: 0,
            input_interval: Duration::from_secs_f64(1.0 / config.input_send_rate as f64),
            last_input_send: now,
            clock_interval: Duration::from_secs_f32(config.clock_sync_interval_secs),
            last_clock_sync: now,
            last_snapshot_time: now,
            last_server_packet: now,
            last_keyframe_request: now,
            connection_start: None,
            last_connect_attempt: now,
            stats: ClientNetStats::default(),
            config,
        })
    }

    pub fn connect(&mut self, server_addr: SocketAddr) -> io::Result<()> {
        log::info!("connecting to {server_addr}");
        self.server_addr = Some(server_addr);
        self.state = ConnectionState::Connecting;
        self.connection_start = Some(Instant::now());
        self.send_connection_request()
    }

    /// Stamps and sends one payload to the server.
    fn post(&mut self, payload: PacketType) -> io::Result<()> {
        let Some(addr) = self.server_addr else {
            return Ok(());
        };
        let packet = self.ledger.stamp(payload);
        self.channel.send_to(&packet, addr)?;
        Ok(())
    }

    fn send_connection_request(&mut self) -> io::Result<()> {
        self.last_connect_attempt = Instant::now();
        self.post(PacketType::ConnectionRequest {
            client_salt: self.client_salt,
        })
    }

    pub fn disconnect(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Connected {
            let _ = self.post(PacketType::Disconnect);
        }
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.peer_id = None;
        self.entity_id = None;
        self.client_salt = skirmish::net::rand_u64();
        self.buffer.clear();
        self.clock.reset();
        self.interpolator.reset();
        self.prediction.reset();
        self.last_received_sequence = 0;
        self.connection_start = None;
        self.server_addr = None;
        self.ledger = PacketLedger::new();
        self.last_server_packet = Instant::now();
    }

    /// One frame of client work: drain the socket, keep the handshake
    /// moving, then run the connected pipeline (clock sync, prediction,
    /// input send, interpolation).
    pub fn update(&mut self, dt: f32, input_direction: Vec2) -> io::Result<()> {
        self.process_network()?;

        match self.state {
            ConnectionState::Connecting | ConnectionState::ChallengeResponse => {
                if let Some(start) = self.connection_start {
                    if start.elapsed() > Duration::from_secs(self.config.connection_timeout_secs) {
                        log::warn!("connection attempt timed out");
                        self.reset();
                    } else if self.state == ConnectionState::Connecting
                        && self.last_connect_attempt.elapsed() > Duration::from_secs(1)
                    {
                        // The request or challenge went missing; try again.
                        self.send_connection_request()?;
                    }
                }
            }
            ConnectionState::Connected => {
                self.run_clock_sync()?;
                self.check_starvation()?;
                self.run_prediction(input_direction);
                self.send_input(input_direction)?;
                self.interpolator
                    .advance(dt, self.clock.server_time_now_ms(), &self.buffer);

                if self.last_server_packet.elapsed()
                    > Duration::from_secs(self.config.connection_timeout_secs)
                {
                    log::warn!("server connection lost");
                    self.reset();
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn run_clock_sync(&mut self) -> io::Result<()> {
        if self.last_clock_sync.elapsed() < self.clock_interval {
            return Ok(());
        }
        self.last_clock_sync = Instant::now();

        let client_send_time_ms = self.clock.local_now_ms() as u32;
        self.post(PacketType::ClockSyncRequest { client_send_time_ms })
    }

    fn check_starvation(&mut self) -> io::Result<()> {
        let starved = self.last_snapshot_time.elapsed()
            > Duration::from_secs_f32(self.config.snapshot_starvation_secs);
        if starved && self.last_keyframe_request.elapsed() > KEYFRAME_REQUEST_INTERVAL {
            log::warn!("snapshot starvation, requesting keyframe");
            self.request_full_snapshot()?;
        }
        Ok(())
    }

    fn request_full_snapshot(&mut self) -> io::Result<()> {
        self.last_keyframe_request = Instant::now();
        self.stats.keyframes_requested += 1;
        self.post(PacketType::RequestFullSnapshot)
    }

    /// Advances local prediction to the tick implied by the synchronized
    /// server clock, quantizing the input exactly as the wire will.
    fn run_prediction(&mut self, input_direction: Vec2) {
        let Some(server_ms) = self.clock.server_time_now_ms() else {
            return;
        };
        let target_tick =
            (server_ms * self.config.server_tick_rate as f64 / 1000.0).floor() as u32;

        let wire_direction =
            skirmish::net::decode_direction(skirmish::net::quantize_direction(input_direction));

        let mut steps = 0;
        while self.prediction.last_tick() < target_tick && steps < MAX_CATCHUP_TICKS {
            let tick = if self.prediction.last_tick() == 0 {
                // First predicted tick starts at the present, not at tick 1.
                target_tick
            } else {
                self.prediction.last_tick() + 1
            };
            self.prediction.tick(tick, wire_direction, server_ms as u32);
            steps += 1;
        }
    }

    fn send_input(&mut self, input_direction: Vec2) -> io::Result<()> {
        if self.last_input_send.elapsed() < self.input_interval {
            return Ok(());
        }
        self.last_input_send = Instant::now();

        let input = PlayerInput::new(
            self.prediction.last_tick(),
            input_direction,
            self.interpolator.render_time_ms().max(0.0) as u32,
            self.last_received_sequence,
        );
        self.post(PacketType::PlayerInput(input))
    }

    /// Reports a shot at the world the player is currently seeing; the
    /// render timestamp lets the server rewind to the same view.
    pub fn fire(&mut self, direction: Vec2) -> io::Result<()> {
        if self.state != ConnectionState::Connected {
            return Ok(());
        }
        let origin = self.prediction.position();
        let client_time_ms = self.interpolator.render_time_ms().max(0.0) as u32;
        self.post(PacketType::FireShot {
            origin: [origin.x, origin.y],
            direction: [direction.x, direction.y],
            client_time_ms,
        })
    }

    fn process_network(&mut self) -> io::Result<()> {
        while let Some((packet, addr)) = self.channel.poll()? {
            // Only the server we dialed gets to talk to us.
            if self.server_addr != Some(addr) {
                continue;
            }
            if !self.ledger.accept(&packet.header) {
                continue;
            }
            self.last_server_packet = Instant::now();
            self.handle_payload(packet.payload)?;
        }
        Ok(())
    }

    fn handle_payload(&mut self, payload: PacketType) -> io::Result<()> {
        match payload {
            PacketType::ConnectionChallenge { challenge, .. } => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::ChallengeResponse;
                    self.post(PacketType::ChallengeResponse {
                        combined_salt: challenge,
                    })?;
                }
            }
            PacketType::ConnectionAccepted { peer_id, entity_id } => {
                if self.state != ConnectionState::Connected {
                    log::info!("connected as peer {peer_id}, entity {entity_id}");
                    self.state = ConnectionState::Connected;
                    self.peer_id = Some(peer_id);
                    self.entity_id = Some(entity_id);
                    self.last_snapshot_time = Instant::now();
                }
            }
            PacketType::ConnectionDenied { reason } => {
                log::warn!("connection denied: {reason}");
                self.reset();
            }
            PacketType::Snapshot(bytes) => {
                self.on_snapshot_bytes(&bytes)?;
            }
            PacketType::ClockSyncReply {
                client_send_time_ms,
                server_receive_time_ms,
                server_send_time_ms,
            } => {
                self.clock.on_reply(
                    client_send_time_ms,
                    server_receive_time_ms,
                    server_send_time_ms,
                );
            }
            PacketType::ShotHit { entity_id } => {
                log::info!("hit confirmed on entity {entity_id}");
            }
            PacketType::Pong { .. } => {}
            PacketType::Disconnect => {
                log::info!("disconnected by server");
                self.reset();
            }
            _ => {}
        }
        Ok(())
    }

    /// The receive path: peek the header, look the baseline up in our own
    /// buffer, decode, admit. A decode failure never touches client state
    /// beyond the failure counters — no partial snapshot is ever admitted.
    fn on_snapshot_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let header = match codec::peek_header(bytes) {
            Ok(header) => header,
            Err(e) => {
                log::warn!("dropping snapshot with unreadable header: {e}");
                self.stats.decode_failures += 1;
                return Ok(());
            }
        };

        let baseline = if header.baseline_sequence > 0 {
            self.buffer.get(header.baseline_sequence)
        } else {
            None
        };

        let snapshot = match codec::decode(bytes, baseline) {
            Ok(snapshot) => snapshot,
            Err(e @ CodecError::BaselineMismatch { .. }) => {
                log::warn!("{e}; requesting keyframe");
                self.stats.baseline_mismatches += 1;
                if self.last_keyframe_request.elapsed() > KEYFRAME_REQUEST_INTERVAL {
                    self.request_full_snapshot()?;
                }
                return Ok(());
            }
            Err(e) => {
                log::warn!("dropping malformed snapshot: {e}");
                self.stats.decode_failures += 1;
                return Ok(());
            }
        };

        self.last_snapshot_time = Instant::now();
        self.admit_snapshot(snapshot);
        Ok(())
    }

    fn admit_snapshot(&mut self, snapshot: Snapshot) {
        let sequence = snapshot.sequence;
        let newest = self.last_received_sequence == 0
            || skirmish::net::snapshot_sequence_newer(sequence, self.last_received_sequence);

        if newest {
            self.last_received_sequence = sequence;
            self.interpolator.on_snapshot(&snapshot);

            if let Some(player_state) = snapshot.player_state() {
                self.prediction
                    .reconcile(player_state, snapshot.last_processed_input_tick);
            }
        }

        if self.buffer.insert(snapshot) {
            self.stats.snapshots_received += 1;
        } else {
            self.stats.snapshots_duplicate += 1;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer_id(&self) -> Option<u32> {
        self.peer_id
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.entity_id
    }

    pub fn predicted_position(&self) -> Vec2 {
        self.prediction.position()
    }

    pub fn prediction(&self) -> &PredictionController {
        &self.prediction
    }

    pub fn interpolated_entities(&self) -> impl Iterator<Item = &InterpolatedEntity> {
        self.interpolator.entities()
    }

    pub fn interpolated_entity(&self, id: EntityId) -> Option<&InterpolatedEntity> {
        self.interpolator.entity(id)
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    pub fn buffered_snapshots(&self) -> usize {
        self.buffer.len()
    }

    pub fn net_stats(&self) -> ClientNetStats {
        self.stats.clone()
    }

    pub fn transport_stats(&self) -> NetworkStats {
        let mut stats = self.ledger.stats();
        stats.bytes_sent = self.channel.bytes_sent();
        stats.bytes_received = self.channel.bytes_received();
        stats
    }
}
