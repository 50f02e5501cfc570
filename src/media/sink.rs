//! Remote media for the view path.

use crate::peer::types::{MediaKind, TrackInfo};
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use webrtc::track::track_remote::TrackRemote;

/// An inbound track as delivered by the transport.
#[derive(Clone)]
pub struct RemoteTrack {
    pub info: TrackInfo,
    pub track: Arc<TrackRemote>,
}

/// Rendering seam: receives every negotiated remote track.
pub trait TrackSink: Send + Sync {
    fn attach(&self, track: RemoteTrack);
}

/// Remote tracks merged into one playable stream.
///
/// Tracks are kept in arrival order; a track id seen twice is ignored.
#[derive(Debug, Default, Clone)]
pub struct PlaybackStream {
    tracks: Vec<TrackInfo>,
}

impl PlaybackStream {
    pub fn add_track(&mut self, info: TrackInfo) -> bool {
        if self.tracks.iter().any(|t| t.id == info.id && t.kind == info.kind) {
            return false;
        }
        self.tracks.push(info);
        true
    }

    pub fn tracks(&self, kind: MediaKind) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    packets: AtomicU64,
    bytes: AtomicU64,
}

/// Sink that reads and discards RTP, counting what arrives per kind.
pub struct DrainSink {
    stream: Mutex<PlaybackStream>,
    counters: BTreeMap<MediaKind, Arc<Counters>>,
}

impl DrainSink {
    pub fn new() -> Self {
        let counters = MediaKind::ALL
            .into_iter()
            .map(|k| (k, Arc::new(Counters::default())))
            .collect();
        Self {
            stream: Mutex::new(PlaybackStream::default()),
            counters,
        }
    }

    pub fn stream(&self) -> PlaybackStream {
        self.stream.lock().unwrap().clone()
    }

    /// (packets, bytes) received so far for `kind`
    pub fn received(&self, kind: MediaKind) -> (u64, u64) {
        self.counters
            .get(&kind)
            .map(|c| (c.packets.load(Ordering::Relaxed), c.bytes.load(Ordering::Relaxed)))
            .unwrap_or_default()
    }
}

impl Default for DrainSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackSink for DrainSink {
    fn attach(&self, remote: RemoteTrack) {
        let added = self.stream.lock().unwrap().add_track(remote.info.clone());
        if !added {
            debug!("Track {} already attached", remote.info.id);
            return;
        }
        info!(
            "Playing {} track {} ({})",
            remote.info.kind, remote.info.id, remote.info.mime_type
        );

        let Some(counters) = self.counters.get(&remote.info.kind).cloned() else {
            return;
        };
        tokio::spawn(async move {
            while let Ok((packet, _)) = remote.track.read_rtp().await {
                counters.packets.fetch_add(1, Ordering::Relaxed);
                counters
                    .bytes
                    .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
            }
            debug!("Remote track {} ended", remote.info.id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, kind: MediaKind) -> TrackInfo {
        TrackInfo {
            id: id.into(),
            stream_id: "s".into(),
            kind,
            mime_type: match kind {
                MediaKind::Audio => "audio/opus".into(),
                MediaKind::Video => "video/VP8".into(),
            },
        }
    }

    #[test]
    fn same_kind_tracks_merge_into_one_stream() {
        let mut stream = PlaybackStream::default();
        assert!(stream.add_track(info("v1", MediaKind::Video)));
        assert!(stream.add_track(info("v2", MediaKind::Video)));
        assert!(stream.add_track(info("a1", MediaKind::Audio)));
        assert!(!stream.add_track(info("v1", MediaKind::Video)));

        assert_eq!(stream.len(), 3);
        let video: Vec<_> = stream.tracks(MediaKind::Video).map(|t| t.id.as_str()).collect();
        assert_eq!(video, vec!["v1", "v2"]);
        assert_eq!(stream.tracks(MediaKind::Audio).count(), 1);
    }

    #[test]
    fn drain_sink_starts_empty() {
        let sink = DrainSink::new();
        assert!(sink.stream().is_empty());
        assert_eq!(sink.received(MediaKind::Video), (0, 0));
    }
}
