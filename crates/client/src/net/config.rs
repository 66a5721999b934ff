#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_tick_rate: u32,
    pub snapshot_rate: u32,
    pub interpolation_delay_ms: f64,
    pub jitter_buffer_ms: f64,
    pub input_send_rate: u32,
    pub clock_sync_interval_secs: f32,
    pub connection_timeout_secs: u64,
    /// Snapshot drought after which the client starts demanding keyframes.
    pub snapshot_starvation_secs: f32,
    pub reconcile_threshold: f32,
}

impl ClientConfig {
    pub fn total_client_delay_ms(&self) -> f64 {
        self.interpolation_delay_ms + self.jitter_buffer_ms
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_tick_rate: skirmish::DEFAULT_TICK_RATE,
            snapshot_rate: skirmish::DEFAULT_SNAPSHOT_RATE,
            interpolation_delay_ms: 100.0,
            jitter_buffer_ms: 50.0,
            input_send_rate: skirmish::INPUT_SEND_RATE,
            clock_sync_interval_secs: 1.0,
            connection_timeout_secs: 10,
            snapshot_starvation_secs: 5.0,
            reconcile_threshold: 2.0,
        }
    }
}
