#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: f32,
    pub snapshot_rate: f32,
    /// Cadence of the transport retransmission sweep.
    pub network_update_interval: f32,
    pub respawn_delay: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            snapshot_rate: 20.0,
            network_update_interval: 0.1,
            respawn_delay: 1.5,
        }
    }
}
