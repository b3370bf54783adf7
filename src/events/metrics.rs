use tokio::time::Instant;

/// Liveness of the payment subscription and the probe loop.
#[derive(Debug, Clone, Default)]
pub struct ListenerMetrics {
    pub connected: bool,
    pub connected_since: Option<Instant>,
    pub disconnected_since: Option<Instant>,
    pub last_event_at: Option<Instant>,
    pub last_probe_at: Option<Instant>,
    pub total_events: u64,
    pub total_probes: u64,
    pub reconnects: u64,
}

impl ListenerMetrics {
    pub fn mark_connected(&mut self) {
        if self.connected_since.is_some() {
            self.reconnects += 1;
        }
        self.connected = true;
        self.connected_since = Some(Instant::now());
        self.disconnected_since = None;
    }

    pub fn mark_disconnected(&mut self) {
        if self.connected || self.disconnected_since.is_none() {
            self.disconnected_since = Some(Instant::now());
        }
        self.connected = false;
    }
}
