pub mod codec;
pub mod connection;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{WebRtcFactory, WebRtcTransport};
pub use state::TransportState;
pub use transport::{Transport, TransportFactory, TransportRequest};
pub use types::{IceCandidate, MediaConstraints, MediaKind, Mode, ServerConfig};
