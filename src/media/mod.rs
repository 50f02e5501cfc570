pub mod sink;
pub mod source;

pub use sink::{DrainSink, PlaybackStream, RemoteTrack, TrackSink};
pub use source::{FileMediaSource, LocalMedia, LocalTrack, MediaSource};
