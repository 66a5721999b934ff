use skirmish::world::InterestConfig;
use skirmish::PacketLossSimulation;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Simulation frequency, Hz. Must be a multiple of `snapshot_rate`.
    pub tick_rate: u32,
    /// Snapshots per second per peer.
    pub snapshot_rate: u32,
    pub max_peers: usize,
    pub connection_timeout_secs: u64,
    /// Per-peer snapshot history entries kept for baseline resolution.
    pub history_size: usize,
    pub lag_comp_history_ticks: usize,
    pub npc_count: u32,
    pub obstacle_count: u32,
    pub interest: InterestConfig,
    /// Applied to every new peer; per-peer overrides go through
    /// `GameServer::set_packet_loss_sim`.
    pub global_packet_loss: Option<PacketLossSimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: skirmish::DEFAULT_TICK_RATE,
            snapshot_rate: skirmish::DEFAULT_SNAPSHOT_RATE,
            max_peers: 32,
            connection_timeout_secs: 10,
            history_size: 60,
            lag_comp_history_ticks: 40,
            npc_count: 24,
            obstacle_count: 4,
            interest: InterestConfig::default(),
            global_packet_loss: None,
        }
    }
}
