//! Local media for the publish path.
//!
//! Capture devices live outside this crate; whatever produces samples hands
//! them over as [`LocalMedia`]. [`FileMediaSource`] plays IVF and Ogg/Opus
//! files, which is what the CLI uses.

use crate::error::{Error, Result};
use crate::peer::types::{MediaConstraints, MediaKind};
use async_trait::async_trait;
use log::{info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use webrtc::api::media_engine::{MIME_TYPE_AV1, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::media::io::ivf_reader::{IVFFileHeader, IVFReader};
use webrtc::media::io::ogg_reader::OggReader;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const OGG_PAGE_DURATION: Duration = Duration::from_millis(20);
const STREAM_ID: &str = "whipctl";

pub struct LocalTrack {
    pub kind: MediaKind,
    pub track: Arc<TrackLocalStaticSample>,
}

/// Tracks handed to the transport, plus the tasks feeding them.
///
/// Feeders sit idle until [`LocalMedia::start`] and are stopped by
/// [`LocalMedia::release`] (or on drop).
pub struct LocalMedia {
    tracks: Vec<LocalTrack>,
    feeders: Vec<JoinHandle<()>>,
    ready: watch::Sender<bool>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            tracks,
            feeders: Vec::new(),
            ready,
        }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn ready_signal(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    fn add_feeder(&mut self, feeder: JoinHandle<()>) {
        self.feeders.push(feeder);
    }

    /// Lets the feeders push samples; called once the transport connects.
    pub fn start(&self) {
        self.ready.send_replace(true);
    }

    pub fn release(&mut self) {
        for feeder in self.feeders.drain(..) {
            feeder.abort();
        }
        self.tracks.clear();
    }
}

impl Default for LocalMedia {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.release();
    }
}

/// Device/capture seam of the publish flow.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia>;
}

/// Reads an IVF video file and/or an Ogg/Opus audio file.
#[derive(Debug, Clone, Default)]
pub struct FileMediaSource {
    pub video: Option<PathBuf>,
    pub audio: Option<PathBuf>,
}

fn open(path: &PathBuf) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::MediaAcquisition(format!("{}: {e}", path.display())))
}

fn ivf_mime_type(header: &IVFFileHeader) -> Option<&'static str> {
    match &header.four_cc {
        b"VP80" => Some(MIME_TYPE_VP8),
        b"VP90" => Some(MIME_TYPE_VP9),
        b"AV01" => Some(MIME_TYPE_AV1),
        _ => None,
    }
}

fn sample_track(kind: MediaKind, mime_type: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            ..Default::default()
        },
        kind.as_str().to_owned(),
        STREAM_ID.to_owned(),
    ))
}

#[async_trait]
impl MediaSource for FileMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        if self.video.is_none() && self.audio.is_none() {
            return Err(Error::MediaAcquisition("no audio or video input given".into()));
        }

        let mut pending = Vec::new();

        if let Some(path) = &self.video {
            let (reader, header) = IVFReader::new(open(path)?)
                .map_err(|e| Error::MediaAcquisition(format!("{}: {e}", path.display())))?;
            let mime = ivf_mime_type(&header).ok_or_else(|| {
                Error::MediaAcquisition(format!(
                    "{}: unsupported IVF codec {:?}",
                    path.display(),
                    String::from_utf8_lossy(&header.four_cc)
                ))
            })?;
            if let Some(wanted) = constraints.video_codec.as_deref() {
                if !wanted.eq_ignore_ascii_case(mime) {
                    warn!("Video file is {mime}, ignoring preferred codec {wanted}");
                }
            }
            let track = sample_track(MediaKind::Video, mime);
            pending.push(Feed::Video(reader, header, track));
        }

        if let Some(path) = &self.audio {
            let (reader, _) = OggReader::new(open(path)?, true)
                .map_err(|e| Error::MediaAcquisition(format!("{}: {e}", path.display())))?;
            let track = sample_track(MediaKind::Audio, MIME_TYPE_OPUS);
            pending.push(Feed::Audio(reader, track));
        }

        let tracks = pending
            .iter()
            .map(|feed| match feed {
                Feed::Video(_, _, track) => LocalTrack {
                    kind: MediaKind::Video,
                    track: track.clone(),
                },
                Feed::Audio(_, track) => LocalTrack {
                    kind: MediaKind::Audio,
                    track: track.clone(),
                },
            })
            .collect();

        let mut media = LocalMedia::new(tracks);
        for feed in pending {
            let ready = media.ready_signal();
            let feeder = match feed {
                Feed::Video(reader, header, track) => {
                    tokio::spawn(feed_ivf(reader, header, track, ready))
                }
                Feed::Audio(reader, track) => tokio::spawn(feed_ogg(reader, track, ready)),
            };
            media.add_feeder(feeder);
        }
        Ok(media)
    }
}

enum Feed {
    Video(IVFReader<BufReader<File>>, IVFFileHeader, Arc<TrackLocalStaticSample>),
    Audio(OggReader<BufReader<File>>, Arc<TrackLocalStaticSample>),
}

async fn feed_ivf(
    mut ivf: IVFReader<BufReader<File>>,
    header: IVFFileHeader,
    track: Arc<TrackLocalStaticSample>,
    mut ready: watch::Receiver<bool>,
) {
    let started = ready.wait_for(|r| *r).await.is_ok();
    if !started {
        return;
    }

    let frame_ms = if header.timebase_denominator == 0 {
        33
    } else {
        (1000 * header.timebase_numerator / header.timebase_denominator).max(1)
    };
    let frame_duration = Duration::from_millis(frame_ms as u64);
    let mut ticker = tokio::time::interval(frame_duration);

    loop {
        ticker.tick().await;
        let frame = match ivf.parse_next_frame() {
            Ok((frame, _)) => frame,
            Err(err) => {
                info!("All video frames sent: {err}");
                return;
            }
        };
        let sample = Sample {
            data: frame.freeze(),
            duration: frame_duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            warn!("Video track write failed: {e}");
            return;
        }
    }
}

async fn feed_ogg(
    mut ogg: OggReader<BufReader<File>>,
    track: Arc<TrackLocalStaticSample>,
    mut ready: watch::Receiver<bool>,
) {
    let started = ready.wait_for(|r| *r).await.is_ok();
    if !started {
        return;
    }

    let mut ticker = tokio::time::interval(OGG_PAGE_DURATION);
    // the granule difference is the number of samples in the page
    let mut last_granule: u64 = 0;
    while let Ok((page_data, page_header)) = ogg.parse_next_page() {
        let sample_count = page_header.granule_position.saturating_sub(last_granule);
        last_granule = page_header.granule_position;
        let sample = Sample {
            data: page_data.freeze(),
            duration: Duration::from_millis(sample_count * 1000 / 48000),
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            warn!("Audio track write failed: {e}");
            return;
        }
        ticker.tick().await;
    }
    info!("All audio pages sent");
}
