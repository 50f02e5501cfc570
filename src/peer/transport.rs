use crate::error::Result;
use crate::media::sink::RemoteTrack;
use crate::media::source::LocalMedia;
use crate::peer::state::TransportState;
use crate::peer::types::{IceCandidate, MediaConstraints, Mode, ServerConfig};
use crate::stats::RawStats;
use async_trait::async_trait;
use std::sync::Arc;

/// `None` signals that ICE gathering is complete.
pub type CandidateHandler = Box<dyn Fn(Option<IceCandidate>) + Send + Sync>;
pub type StateHandler = Box<dyn Fn(TransportState) + Send + Sync>;
pub type RemoteTrackHandler = Box<dyn Fn(RemoteTrack) + Send + Sync>;

/// One peer connection and its transceivers.
///
/// Handlers may be installed at any time; events fired before a handler is
/// installed are dropped.
#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> Mode;

    /// Creates an offer, applies it locally and returns the SDP to send.
    /// With `wait_for_gathering` the SDP already carries every candidate.
    async fn create_local_offer(&self, wait_for_gathering: bool) -> Result<String>;

    async fn set_remote_answer(&self, sdp: &str) -> Result<()>;

    fn connection_state(&self) -> TransportState;

    fn on_local_candidate(&self, handler: CandidateHandler);

    fn on_connection_state_change(&self, handler: StateHandler);

    fn on_remote_track(&self, handler: RemoteTrackHandler);

    /// Raw counters for the stats sampler.
    async fn raw_stats(&self) -> Result<RawStats>;

    /// Releases the connection and local tracks. Only the first call acts.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// What the orchestrator asks for when it needs a new transport.
pub struct TransportRequest {
    pub mode: Mode,
    pub media: LocalMedia,
    pub constraints: MediaConstraints,
    pub ice_servers: Vec<ServerConfig>,
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, request: TransportRequest) -> Result<Arc<dyn Transport>>;
}
