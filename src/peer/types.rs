use serde::{Deserialize, Serialize};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// WHIP publishes, WHEP views.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Publish,
    View,
}

impl Mode {
    pub fn protocol(self) -> &'static str {
        match self {
            Mode::Publish => "WHIP",
            Mode::View => "WHEP",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MediaKind> for RTPCodecType {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        }
    }
}

/// Locally gathered ICE candidate on its way to the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// ICE server entry, from config or from a `Link: rel="ice-server"` header
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Per-kind encoding caps. `None` means "Auto": leave it to the engine.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EncodingConstraints {
    /// bits per second
    #[serde(default)]
    pub max_bitrate: Option<u32>,
    #[serde(default)]
    pub max_framerate: Option<f64>,
}

impl EncodingConstraints {
    pub fn is_auto(&self) -> bool {
        self.max_bitrate.is_none() && self.max_framerate.is_none()
    }
}

/// Codec choice and encoding caps picked by the user before starting.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MediaConstraints {
    /// e.g. "video/VP9"; `None` keeps the engine order.
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub video: EncodingConstraints,
    #[serde(default)]
    pub audio: EncodingConstraints,
}

impl MediaConstraints {
    pub fn preferred_codec(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Audio => self.audio_codec.as_deref(),
            MediaKind::Video => self.video_codec.as_deref(),
        }
    }

    pub fn encoding(&self, kind: MediaKind) -> &EncodingConstraints {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }
}

/// Identity of a remote track, independent of the engine's track object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    pub mime_type: String,
}
