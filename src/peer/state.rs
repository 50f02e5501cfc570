use serde::Serialize;
use std::time::Duration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// ========== TRANSPORT STATE ==========

/// Connectivity of one peer connection, as reported by the RTC engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl From<RTCPeerConnectionState> for TransportState {
    fn from(st: RTCPeerConnectionState) -> Self {
        match st {
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
            _ => TransportState::New,
        }
    }
}

/// ========== CONSTANTS ==========

/// Stats sampling cadence
pub const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for each WHIP/WHEP HTTP request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a non-trickle offer waits for ICE gathering
pub const GATHERING_TIMEOUT: Duration = Duration::from_secs(10);

/// First wait before re-sending a trickle PATCH that failed
pub const TRICKLE_RETRY_INITIAL: Duration = Duration::from_millis(100);

/// Trickle retry delays double up to this
pub const TRICKLE_RETRY_MAX: Duration = Duration::from_secs(2);
