use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec2;

use skirmish::lagcomp::{LagCompensation, HIT_RADIUS};
use skirmish::net::codec;
use skirmish::simulation::{
    facing_flags, step_obstacle, step_player, FixedTimestep, InputCommand, FLAG_MOVING,
};
use skirmish::snapshot::{EntityState, Snapshot};
use skirmish::world::{EntityKind, InterestManager, World};
use skirmish::{
    ConnectionManager, ConnectionState, KinematicPhysics, Packet, PacketLossSimulation,
    PacketType, PlayerInput, UdpChannel, INPUT_SEND_RATE, MAX_PACKET_SIZE,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};

/// Envelope allowance subtracted from the MTU before budgeting snapshot
/// payload bytes.
const ENVELOPE_OVERHEAD: usize = 64;

/// Ticks between sprite frame advances for a moving entity.
const ANIMATION_DIVISOR: u32 = 6;

pub struct GameServer {
    channel: UdpChannel,
    connections: ConnectionManager,
    config: ServerConfig,
    world: World,
    interest: InterestManager,
    lagcomp: LagCompensation,
    physics: KinematicPhysics,
    timestep: FixedTimestep,
    current_tick: u32,
    snapshot_divisor: u32,
    last_frame_time: Instant,
    running: Arc<AtomicBool>,
    pending_events: Vec<ServerEvent>,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        if config.snapshot_rate == 0 || config.tick_rate % config.snapshot_rate != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tick_rate must be a positive multiple of snapshot_rate",
            ));
        }

        let channel = UdpChannel::open(bind_addr)?;

        let mut world = World::new();
        populate_world(&mut world, &config);

        Ok(Self {
            channel,
            connections: ConnectionManager::new(
                config.max_peers,
                Duration::from_secs(config.connection_timeout_secs),
                config.history_size,
                INPUT_SEND_RATE,
            ),
            world,
            interest: InterestManager::new(config.interest.clone()),
            lagcomp: LagCompensation::new(config.lag_comp_history_ticks),
            physics: KinematicPhysics::standard_arena(),
            timestep: FixedTimestep::new(config.tick_rate),
            current_tick: 0,
            snapshot_divisor: config.tick_rate / config.snapshot_rate,
            last_frame_time: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            pending_events: Vec::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn run(&mut self) {
        let mut last_stats = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.drain_events() {
                log_event(&event);
            }

            if last_stats.elapsed() >= Duration::from_secs(5) {
                last_stats = Instant::now();
                let stats = self.stats();
                log::debug!(
                    "tick={} peers={}/{} entities={} sent={}B recv={}B",
                    stats.tick,
                    stats.peer_count,
                    stats.max_peers,
                    stats.entity_count,
                    stats.bytes_sent,
                    stats.bytes_received,
                );
            }

            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown_connections();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_frame_time;
        self.last_frame_time = now;
        self.timestep.accumulate(delta.as_secs_f32());

        if let Err(e) = self.process_network() {
            self.pending_events.push(ServerEvent::Error {
                message: format!("network error: {e}"),
            });
        }

        while self.timestep.consume_tick() {
            self.step();
        }
    }

    /// One authoritative simulation step.
    fn step(&mut self) {
        self.current_tick += 1;
        let dt = self.timestep.dt();

        self.apply_player_inputs(dt);
        self.drive_scripted_entities(dt);
        self.world.refresh_chunks();
        self.lagcomp.record(self.current_tick, self.world.positions());

        if self.current_tick % self.snapshot_divisor == 0 {
            self.send_snapshots();
        }

        self.cleanup_timed_out();
    }

    fn apply_player_inputs(&mut self, dt: f32) {
        for peer in self.connections.iter_mut() {
            if peer.state != ConnectionState::Connected {
                continue;
            }
            let Some(entity_id) = peer.entity_id else {
                continue;
            };
            let Some(command) = peer.take_latest_input() else {
                continue;
            };
            let Some(entity) = self.world.get_mut(entity_id) else {
                continue;
            };

            let (position, velocity) =
                step_player(&self.physics, &entity.collider, entity.position, command.direction, dt);
            entity.position = position;
            entity.velocity = velocity;
            entity.state_flags = facing_flags(command.direction, entity.state_flags);
            if entity.state_flags & FLAG_MOVING != 0 && self.current_tick % ANIMATION_DIVISOR == 0 {
                entity.sprite_frame = entity.sprite_frame.wrapping_add(1);
            }
        }
    }

    fn drive_scripted_entities(&mut self, dt: f32) {
        for entity in self.world.entities_mut() {
            if entity.kind == EntityKind::MovingObstacle {
                step_obstacle(entity, dt);
            }
        }
    }

    fn send_snapshots(&mut self) {
        let payload_budget = codec::max_states_for_budget(MAX_PACKET_SIZE - ENVELOPE_OVERHEAD);
        let timestamp_ms = self.world.timestamp_ms();

        for peer_id in self.connections.peer_ids() {
            let Some(peer) = self.connections.get(peer_id) else {
                continue;
            };
            if peer.state != ConnectionState::Connected {
                continue;
            }
            let Some(player_id) = peer.entity_id else {
                continue;
            };
            let Some(player) = self.world.get(player_id) else {
                continue;
            };
            let center = player.position;

            let visible =
                self.interest
                    .select_visible(peer_id, player_id, center, &self.world, payload_budget);

            let mut states: BTreeMap<_, _> = BTreeMap::new();
            for id in &visible {
                if let Some(entity) = self.world.get(*id) {
                    states.insert(*id, EntityState::of(entity));
                }
            }

            let Some(peer) = self.connections.get_mut(peer_id) else {
                continue;
            };
            let sequence = peer.allocate_snapshot_sequence();
            // Clone ends the history borrow before the peer is mutated again.
            let baseline = peer.baseline_for_build().cloned();

            let snapshot = Snapshot {
                sequence,
                timestamp_ms,
                baseline_sequence: baseline.as_ref().map_or(0, |b| b.sequence),
                player_entity_id: player_id,
                last_processed_input_tick: peer.last_input_tick(),
                states,
            };

            let bytes = codec::encode(&snapshot, baseline.as_ref());
            let addr = peer.addr;
            let dropped = peer.packet_loss_sim.should_drop();
            let packet = peer.make_packet(PacketType::Snapshot(bytes));
            peer.finish_snapshot_build(snapshot);

            if dropped {
                continue;
            }
            if let Err(e) = self.channel.send_to(&packet, addr) {
                self.pending_events.push(ServerEvent::Error {
                    message: format!("failed to send snapshot to {addr}: {e}"),
                });
            }
        }
    }

    fn cleanup_timed_out(&mut self) {
        for peer in self.connections.cleanup_timed_out() {
            if let Some(entity_id) = peer.entity_id {
                self.world.despawn(entity_id);
            }
            self.interest.forget_peer(peer.peer_id);
            self.pending_events.push(ServerEvent::PeerDisconnected {
                peer_id: peer.peer_id,
                reason: DisconnectReason::Timeout,
            });
        }
    }

    fn process_network(&mut self) -> io::Result<()> {
        while let Some((packet, addr)) = self.channel.poll()? {
            self.handle_packet(packet, addr)?;
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> io::Result<()> {
        if let Some(peer) = self.connections.get_by_addr_mut(&addr) {
            if !peer.note_packet(&packet.header) {
                return Ok(());
            }
        }

        match packet.payload {
            PacketType::ConnectionRequest { client_salt } => {
                self.handle_connection_request(addr, client_salt)?;
            }
            PacketType::ChallengeResponse { combined_salt } => {
                self.handle_challenge_response(addr, combined_salt)?;
            }
            PacketType::PlayerInput(input) => {
                self.handle_player_input(addr, input);
            }
            PacketType::RequestFullSnapshot => {
                if let Some(peer) = self.connections.get_by_addr_mut(&addr) {
                    peer.request_keyframe();
                }
            }
            PacketType::ClockSyncRequest { client_send_time_ms } => {
                self.handle_clock_sync(addr, client_send_time_ms)?;
            }
            PacketType::FireShot {
                origin,
                direction,
                client_time_ms,
            } => {
                self.handle_fire_shot(addr, origin, direction, client_time_ms)?;
            }
            PacketType::Ping { timestamp } => {
                if let Some(peer) = self.connections.get_by_addr_mut(&addr) {
                    let pong = peer.make_packet(PacketType::Pong { timestamp });
                    self.channel.send_to(&pong, addr)?;
                }
            }
            PacketType::Disconnect => {
                self.handle_disconnect(addr);
            }
            _ => {}
        }

        Ok(())
    }

    fn handle_connection_request(&mut self, addr: SocketAddr, client_salt: u64) -> io::Result<()> {
        self.pending_events.push(ServerEvent::PeerConnecting { addr });

        let global_sim = self.config.global_packet_loss.clone();
        let peer = match self.connections.get_or_create_pending(addr, client_salt) {
            Ok(peer) => peer,
            Err(reason) => {
                let packet = Packet::new(
                    skirmish::PacketHeader::new(0, 0, 0),
                    PacketType::ConnectionDenied {
                        reason: reason.to_string(),
                    },
                );
                self.channel.send_to(&packet, addr)?;
                self.pending_events.push(ServerEvent::ConnectionDenied {
                    addr,
                    reason: reason.to_string(),
                });
                return Ok(());
            }
        };

        if let Some(sim) = global_sim {
            peer.packet_loss_sim = sim;
        }

        let server_salt = peer.server_salt;
        let challenge = peer.combined_salt();
        let packet = peer.make_packet(PacketType::ConnectionChallenge {
            server_salt,
            challenge,
        });
        self.channel.send_to(&packet, addr)?;
        Ok(())
    }

    fn handle_challenge_response(&mut self, addr: SocketAddr, combined_salt: u64) -> io::Result<()> {
        let Some(peer) = self.connections.get_by_addr_mut(&addr) else {
            return Ok(());
        };

        if combined_salt != peer.combined_salt() {
            self.pending_events.push(ServerEvent::Error {
                message: format!("invalid challenge response from {addr}"),
            });
            return Ok(());
        }

        if peer.state == ConnectionState::Connected {
            // Response was duplicated or resent; re-send the accept.
            let peer_id = peer.peer_id;
            let entity_id = peer.entity_id.unwrap_or(0);
            let packet = peer.make_packet(PacketType::ConnectionAccepted { peer_id, entity_id });
            self.channel.send_to(&packet, addr)?;
            return Ok(());
        }

        peer.state = ConnectionState::Connected;
        let peer_id = peer.peer_id;

        let entity_id = self.world.spawn_player(peer_id, spawn_position(peer_id));
        let Some(peer) = self.connections.get_by_addr_mut(&addr) else {
            return Ok(());
        };
        peer.entity_id = Some(entity_id);

        self.pending_events.push(ServerEvent::PeerConnected {
            peer_id,
            addr,
            entity_id,
        });

        let packet = peer.make_packet(PacketType::ConnectionAccepted { peer_id, entity_id });
        self.channel.send_to(&packet, addr)?;
        Ok(())
    }

    fn handle_player_input(&mut self, addr: SocketAddr, input: PlayerInput) {
        let Some(peer) = self.connections.get_by_addr_mut(&addr) else {
            return;
        };
        if peer.state != ConnectionState::Connected {
            return;
        }

        peer.acknowledge_snapshot(input.last_received_sequence);

        // The wire direction is already bounded to the unit square; the
        // motion rule normalizes it again, so a forged magnitude can never
        // reach velocity.
        let command = InputCommand {
            tick: input.tick,
            direction: input.direction_vec(),
            timestamp_ms: input.render_time_ms,
        };
        if !peer.queue_input(command) {
            log::debug!("rate-limited input from peer {}", peer.peer_id);
        }
    }

    fn handle_clock_sync(&mut self, addr: SocketAddr, client_send_time_ms: u32) -> io::Result<()> {
        let server_receive_time_ms = self.world.timestamp_ms();
        let Some(peer) = self.connections.get_by_addr_mut(&addr) else {
            return Ok(());
        };
        let server_send_time_ms = server_receive_time_ms;
        let packet = peer.make_packet(PacketType::ClockSyncReply {
            client_send_time_ms,
            server_receive_time_ms,
            server_send_time_ms,
        });
        self.channel.send_to(&packet, addr)?;
        Ok(())
    }

    fn handle_fire_shot(
        &mut self,
        addr: SocketAddr,
        origin: [f32; 2],
        direction: [f32; 2],
        client_time_ms: u32,
    ) -> io::Result<()> {
        let Some(peer) = self.connections.get_by_addr(&addr) else {
            return Ok(());
        };
        if peer.state != ConnectionState::Connected {
            return Ok(());
        }
        let peer_id = peer.peer_id;
        let shooter = peer.entity_id.unwrap_or(0);

        let current_positions = self.world.positions();
        let hit = self.lagcomp.verify_hit(
            Vec2::from(origin),
            Vec2::from(direction),
            client_time_ms,
            self.config.tick_rate,
            self.current_tick,
            &current_positions,
            shooter,
            HIT_RADIUS,
        );

        if let Some(target) = hit {
            self.pending_events.push(ServerEvent::ShotConfirmed {
                peer_id,
                target,
            });
            if let Some(peer) = self.connections.get_by_addr_mut(&addr) {
                let packet = peer.make_packet(PacketType::ShotHit { entity_id: target });
                self.channel.send_to(&packet, addr)?;
            }
        }
        Ok(())
    }

    fn handle_disconnect(&mut self, addr: SocketAddr) {
        if let Some(peer) = self.connections.remove_by_addr(&addr) {
            if let Some(entity_id) = peer.entity_id {
                self.world.despawn(entity_id);
            }
            self.interest.forget_peer(peer.peer_id);
            self.pending_events.push(ServerEvent::PeerDisconnected {
                peer_id: peer.peer_id,
                reason: DisconnectReason::Graceful,
            });
        }
    }

    pub fn kick_peer(&mut self, peer_id: u32) {
        if let Some(peer) = self.connections.get_mut(peer_id) {
            let addr = peer.addr;
            let packet = peer.make_packet(PacketType::Disconnect);
            let _ = self.channel.send_to(&packet, addr);
        }
        if let Some(peer) = self.connections.remove(peer_id) {
            if let Some(entity_id) = peer.entity_id {
                self.world.despawn(entity_id);
            }
            self.interest.forget_peer(peer_id);
            self.pending_events.push(ServerEvent::PeerDisconnected {
                peer_id,
                reason: DisconnectReason::Kicked,
            });
        }
    }

    pub fn shutdown_connections(&mut self) {
        for peer_id in self.connections.peer_ids() {
            self.kick_peer(peer_id);
        }
    }

    pub fn set_packet_loss_sim(&mut self, peer_id: u32, sim: PacketLossSimulation) {
        if let Some(peer) = self.connections.get_mut(peer_id) {
            peer.packet_loss_sim = sim;
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.current_tick,
            peer_count: self.connections.connected_count(),
            max_peers: self.config.max_peers,
            entity_count: self.world.entity_count(),
            bytes_sent: self.channel.bytes_sent(),
            bytes_received: self.channel.bytes_received(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u32,
    pub peer_count: usize,
    pub max_peers: usize,
    pub entity_count: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Deterministic starting layout: NPCs on a ring, obstacles patrolling
/// fixed lanes.
fn populate_world(world: &mut World, config: &ServerConfig) {
    for i in 0..config.npc_count {
        let angle = i as f32 / config.npc_count.max(1) as f32 * std::f32::consts::TAU;
        let radius = 120.0 + (i % 3) as f32 * 90.0;
        world.spawn_npc(Vec2::new(angle.cos(), angle.sin()) * radius);
    }

    for i in 0..config.obstacle_count {
        let lane = -200.0 + i as f32 * 130.0;
        world.spawn_obstacle(
            Vec2::new(-400.0, lane),
            Vec2::new(400.0, lane),
            40.0 + i as f32 * 10.0,
        );
    }
}

fn spawn_position(peer_id: u32) -> Vec2 {
    // Spread spawns so players do not stack on one point.
    let angle = (peer_id % 16) as f32 / 16.0 * std::f32::consts::TAU;
    Vec2::new(angle.cos(), angle.sin()) * 80.0
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::PeerConnecting { addr } => log::debug!("connection attempt from {addr}"),
        ServerEvent::PeerConnected {
            peer_id,
            addr,
            entity_id,
        } => log::info!("peer {peer_id} connected from {addr} as entity {entity_id}"),
        ServerEvent::PeerDisconnected { peer_id, reason } => {
            log::info!("peer {peer_id} {}", reason.as_str())
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            log::warn!("denied connection from {addr}: {reason}")
        }
        ServerEvent::ShotConfirmed { peer_id, target } => {
            log::info!("peer {peer_id} hit entity {target}")
        }
        ServerEvent::Error { message } => log::error!("{message}"),
    }
}
