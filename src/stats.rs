//! Periodic statistics for a connected session.
//!
//! The sampler polls a [`StatsSource`] on a fixed cadence and turns two
//! consecutive raw readings into a [`StatsSnapshot`]. Only the latest raw
//! reading is kept between ticks.

use crate::error::Result;
use crate::peer::transport::Transport;
use crate::peer::types::MediaKind;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Counters of one RTP stream as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrackStats {
    pub kind: MediaKind,
    /// Cumulative payload bytes, sent or received depending on the mode.
    pub bytes: u64,
    pub codec_id: Option<String>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub frames_per_second: Option<f64>,
    pub audio_level: Option<f64>,
}

impl RawTrackStats {
    pub fn new(kind: MediaKind, bytes: u64) -> Self {
        Self {
            kind,
            bytes,
            codec_id: None,
            frame_width: None,
            frame_height: None,
            frames_per_second: None,
            audio_level: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStats {
    pub tracks: Vec<RawTrackStats>,
    /// codec id -> media type, e.g. "video/VP8"
    pub codecs: HashMap<String, String>,
    pub ice_state: Option<String>,
    pub dtls_state: Option<String>,
}

impl RawStats {
    fn bytes(&self, kind: MediaKind) -> u64 {
        self.tracks.iter().filter(|t| t.kind == kind).map(|t| t.bytes).sum()
    }

    fn first<T>(&self, kind: MediaKind, f: impl Fn(&RawTrackStats) -> Option<T>) -> Option<T> {
        self.tracks.iter().filter(|t| t.kind == kind).find_map(f)
    }

    fn has(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }
}

/// Where raw counters come from. Polling today; a push source can slot in.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn sample(&self) -> Result<RawStats>;
}

/// Polls the session's transport.
pub struct TransportStats {
    transport: Arc<dyn Transport>,
}

impl TransportStats {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl StatsSource for TransportStats {
    async fn sample(&self) -> Result<RawStats> {
        self.transport.raw_stats().await
    }
}

/// Bits per second between two cumulative byte counters.
///
/// Non-positive elapsed time (first sample, clock going backwards) yields 0,
/// and so does a counter that went down.
pub fn bitrate(previous_bytes: u64, current_bytes: u64, elapsed_secs: f64) -> u64 {
    if !(elapsed_secs > 0.0) {
        return 0;
    }
    let delta = current_bytes.saturating_sub(previous_bytes);
    ((delta as f64 * 8.0) / elapsed_secs).round() as u64
}

/// "video/vp8" -> "VP8"
pub fn codec_label(codecs: &HashMap<String, String>, codec_id: &str) -> Option<String> {
    let mime = codecs.get(codec_id)?;
    let subtype = mime.split_once('/').map(|(_, s)| s).unwrap_or(mime);
    if subtype.is_empty() {
        return None;
    }
    Some(subtype.to_ascii_uppercase())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindStats {
    pub kind: MediaKind,
    pub codec: Option<String>,
    pub bitrate_bps: u64,
    pub frame_rate: Option<f64>,
    pub resolution: Option<(u32, u32)>,
    pub audio_level: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub audio: Option<KindStats>,
    pub video: Option<KindStats>,
    pub ice_state: Option<String>,
    pub dtls_state: Option<String>,
}

impl StatsSnapshot {
    pub fn get(&self, kind: MediaKind) -> Option<&KindStats> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }
}

/// Builds a snapshot from the current reading and, when there is one, the
/// previous reading taken `elapsed_secs` earlier.
pub fn derive_snapshot(previous: Option<(&RawStats, f64)>, current: &RawStats) -> StatsSnapshot {
    let kind_stats = |kind: MediaKind| -> Option<KindStats> {
        if !current.has(kind) {
            return None;
        }
        let bitrate_bps = match previous {
            Some((prev, elapsed)) => bitrate(prev.bytes(kind), current.bytes(kind), elapsed),
            None => 0,
        };
        let resolution = current.first(kind, |t| Some((t.frame_width?, t.frame_height?)));
        Some(KindStats {
            kind,
            codec: current.first(kind, |t| {
                t.codec_id.as_deref().and_then(|id| codec_label(&current.codecs, id))
            }),
            bitrate_bps,
            frame_rate: current.first(kind, |t| t.frames_per_second),
            resolution,
            audio_level: current.first(kind, |t| t.audio_level),
        })
    };

    StatsSnapshot {
        audio: kind_stats(MediaKind::Audio),
        video: kind_stats(MediaKind::Video),
        ice_state: current.ice_state.clone(),
        dtls_state: current.dtls_state.clone(),
    }
}

struct Field<'a, T>(&'a Option<T>);

impl<T: fmt::Display> fmt::Display for Field<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v}"),
            None => f.write_str("unavailable"),
        }
    }
}

impl fmt::Display for KindStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} codec={} bitrate={}kbps",
            self.kind,
            Field(&self.codec),
            self.bitrate_bps / 1000
        )?;
        match self.kind {
            MediaKind::Video => {
                let resolution = self.resolution.map(|(w, h)| format!("{w}x{h}"));
                let fps = self.frame_rate.map(|r| format!("{r:.1}"));
                write!(f, " resolution={} fps={}", Field(&resolution), Field(&fps))
            }
            MediaKind::Audio => {
                let level = self.audio_level.map(|l| format!("{l:.3}"));
                write!(f, " level={}", Field(&level))
            }
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in [&self.video, &self.audio].into_iter().flatten() {
            write!(f, "{kind} | ")?;
        }
        write!(
            f,
            "ice={} dtls={}",
            Field(&self.ice_state),
            Field(&self.dtls_state)
        )
    }
}

/// Recurring sampling task. Dropping or cancelling the handle stops it.
pub struct SamplerHandle {
    task: JoinHandle<()>,
}

impl SamplerHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct StatsSampler {
    source: Arc<dyn StatsSource>,
    interval: Duration,
}

impl StatsSampler {
    pub fn new(source: Arc<dyn StatsSource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    pub fn spawn<F>(self, on_snapshot: F) -> SamplerHandle
    where
        F: Fn(StatsSnapshot) + Send + Sync + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut previous: Option<(Instant, RawStats)> = None;

            loop {
                ticker.tick().await;
                let current = match self.source.sample().await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("Stats sample failed: {e}");
                        continue;
                    }
                };
                let now = Instant::now();
                let snapshot = derive_snapshot(
                    previous
                        .as_ref()
                        .map(|(at, raw)| (raw, now.duration_since(*at).as_secs_f64())),
                    &current,
                );
                debug!("Stats: {snapshot}");
                on_snapshot(snapshot);
                previous = Some((now, current));
            }
        });
        SamplerHandle { task }
    }
}
