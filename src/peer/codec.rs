use crate::peer::types::{EncodingConstraints, MediaConstraints, MediaKind};
use once_cell::sync::Lazy;
use webrtc::api::media_engine::{
    MediaEngine, MIME_TYPE_AV1, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9,
};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};
use webrtc::rtp_transceiver::RTCPFeedback;

fn video_feedback() -> Vec<RTCPFeedback> {
    [("goog-remb", ""), ("ccm", "fir"), ("nack", ""), ("nack", "pli")]
        .into_iter()
        .map(|(typ, parameter)| RTCPFeedback {
            typ: typ.to_owned(),
            parameter: parameter.to_owned(),
        })
        .collect()
}

fn codec(
    mime_type: &str,
    clock_rate: u32,
    channels: u16,
    fmtp: &str,
    payload_type: u8,
) -> RTCRtpCodecParameters {
    let rtcp_feedback = if mime_type.starts_with("video/") {
        video_feedback()
    } else {
        vec![]
    };
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            clock_rate,
            channels,
            sdp_fmtp_line: fmtp.to_owned(),
            rtcp_feedback,
        },
        payload_type,
        ..Default::default()
    }
}

/// Codecs registered with the engine, in default preference order.
pub static SUPPORTED_CODECS: Lazy<Vec<(MediaKind, RTCRtpCodecParameters)>> = Lazy::new(|| {
    vec![
        (
            MediaKind::Audio,
            codec(MIME_TYPE_OPUS, 48000, 2, "minptime=10;useinbandfec=1", 111),
        ),
        (MediaKind::Video, codec(MIME_TYPE_VP8, 90000, 0, "", 96)),
        (MediaKind::Video, codec(MIME_TYPE_VP9, 90000, 0, "profile-id=0", 98)),
        (
            MediaKind::Video,
            codec(
                MIME_TYPE_H264,
                90000,
                0,
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
                102,
            ),
        ),
        (MediaKind::Video, codec(MIME_TYPE_AV1, 90000, 0, "", 45)),
    ]
});

pub fn codecs_for(kind: MediaKind) -> Vec<RTCRtpCodecParameters> {
    SUPPORTED_CODECS
        .iter()
        .filter(|(k, _)| *k == kind)
        .map(|(_, c)| c.clone())
        .collect()
}

pub fn register_codecs(media_engine: &mut MediaEngine) -> webrtc::error::Result<()> {
    for (kind, params) in SUPPORTED_CODECS.iter() {
        media_engine.register_codec(params.clone(), (*kind).into())?;
    }
    Ok(())
}

/// Moves every codec whose mime type matches `preferred` to the front.
///
/// Both groups keep their original relative order. An unknown or absent
/// preference leaves the list untouched.
pub fn prefer_codec<T>(codecs: Vec<T>, preferred: Option<&str>, mime_of: impl Fn(&T) -> &str) -> Vec<T> {
    let Some(preferred) = preferred else {
        return codecs;
    };
    let (mut first, rest): (Vec<T>, Vec<T>) = codecs
        .into_iter()
        .partition(|c| mime_of(c).eq_ignore_ascii_case(preferred));
    first.extend(rest);
    first
}

/// Engine codec list for `kind`, reordered by the user's preference.
pub fn preferred_codecs(kind: MediaKind, constraints: &MediaConstraints) -> Vec<RTCRtpCodecParameters> {
    prefer_codec(codecs_for(kind), constraints.preferred_codec(kind), |c| {
        c.capability.mime_type.as_str()
    })
}

/// Engine codecs a local track can be sent as. A sample track carries one
/// codec, so the user's preference cannot change what goes out.
pub fn track_codecs(kind: MediaKind, track_mime: &str) -> Vec<RTCRtpCodecParameters> {
    codecs_for(kind)
        .into_iter()
        .filter(|c| c.capability.mime_type.eq_ignore_ascii_case(track_mime))
        .collect()
}

fn section_kind(m_line: &str) -> Option<MediaKind> {
    match m_line.trim_start_matches("m=").split(' ').next() {
        Some("audio") => Some(MediaKind::Audio),
        Some("video") => Some(MediaKind::Video),
        _ => None,
    }
}

fn constraint_lines(c: &EncodingConstraints) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(bps) = c.max_bitrate {
        lines.push(format!("b=AS:{}", bps.div_ceil(1000)));
        lines.push(format!("b=TIAS:{bps}"));
    }
    if let Some(fps) = c.max_framerate {
        lines.push(format!("a=framerate:{fps}"));
    }
    lines
}

/// Writes max bitrate (`b=AS`/`b=TIAS`) and max frame rate
/// (`a=framerate`) into each audio/video section of an offer.
///
/// Sections whose constraints are Auto are copied verbatim, and an offer
/// without any constraint comes back unchanged.
pub fn apply_encoding_constraints(sdp: &str, constraints: &MediaConstraints) -> String {
    if constraints.audio.is_auto() && constraints.video.is_auto() {
        return sdp.to_owned();
    }

    let mut out: Vec<String> = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut rewriting = false;

    for line in sdp.lines().map(|l| l.trim_end_matches('\r')) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("m=") {
            out.append(&mut pending);
            let enc = section_kind(line).map(|k| constraints.encoding(k));
            rewriting = enc.is_some_and(|e| !e.is_auto());
            pending = enc.map(constraint_lines).unwrap_or_default();
            out.push(line.to_owned());
            continue;
        }
        // b= belongs after i= and c=; ours replace whatever the engine wrote
        if rewriting && line.starts_with("b=") {
            continue;
        }
        if !pending.is_empty() && !line.starts_with("i=") && !line.starts_with("c=") {
            out.append(&mut pending);
        }
        out.push(line.to_owned());
    }
    out.append(&mut pending);

    let mut sdp = out.join("\r\n");
    sdp.push_str("\r\n");
    sdp
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 4215775240449105457 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:0\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96 98\r\n\
        c=IN IP4 0.0.0.0\r\n\
        b=AS:9000\r\n\
        a=mid:1\r\n\
        a=rtpmap:96 VP8/90000\r\n";

    #[test]
    fn preferred_codec_moves_first_keeping_order() {
        let list = vec!["video/VP8", "video/H264", "video/VP9", "video/H264"];
        let sorted = prefer_codec(list.clone(), Some("video/h264"), |c| c);
        assert_eq!(sorted, vec!["video/H264", "video/H264", "video/VP8", "video/VP9"]);

        let untouched = prefer_codec(list.clone(), Some("video/HEVC"), |c| c);
        assert_eq!(untouched, list);
        assert_eq!(prefer_codec(list.clone(), None, |c| c), list);
    }

    #[test]
    fn engine_codecs_follow_preference() {
        let constraints = MediaConstraints {
            video_codec: Some("video/VP9".into()),
            ..Default::default()
        };
        let video = preferred_codecs(MediaKind::Video, &constraints);
        let mimes: Vec<_> = video.iter().map(|c| c.capability.mime_type.as_str()).collect();
        assert_eq!(mimes, vec![MIME_TYPE_VP9, MIME_TYPE_VP8, MIME_TYPE_H264, MIME_TYPE_AV1]);

        let audio = preferred_codecs(MediaKind::Audio, &constraints);
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].capability.mime_type, MIME_TYPE_OPUS);
    }

    #[test]
    fn track_codecs_ignore_preference() {
        let vp9 = track_codecs(MediaKind::Video, "video/vp9");
        assert_eq!(vp9.len(), 1);
        assert_eq!(vp9[0].capability.mime_type, MIME_TYPE_VP9);
        assert!(track_codecs(MediaKind::Video, "video/HEVC").is_empty());
        assert!(track_codecs(MediaKind::Audio, MIME_TYPE_VP8).is_empty());
    }

    #[test]
    fn auto_constraints_leave_offer_alone() {
        assert_eq!(apply_encoding_constraints(OFFER, &MediaConstraints::default()), OFFER);
    }

    #[test]
    fn video_caps_rewrite_video_section_only() {
        let constraints = MediaConstraints {
            video: EncodingConstraints {
                max_bitrate: Some(2_500_000),
                max_framerate: Some(30.0),
            },
            ..Default::default()
        };
        let sdp = apply_encoding_constraints(OFFER, &constraints);
        let lines: Vec<&str> = sdp.split("\r\n").collect();

        let video = lines.iter().position(|l| l.starts_with("m=video")).unwrap();
        assert_eq!(lines[video + 1], "c=IN IP4 0.0.0.0");
        assert_eq!(lines[video + 2], "b=AS:2500");
        assert_eq!(lines[video + 3], "b=TIAS:2500000");
        assert_eq!(lines[video + 4], "a=framerate:30");
        assert_eq!(lines[video + 5], "a=mid:1");
        assert!(!sdp.contains("b=AS:9000"));

        let audio = lines.iter().position(|l| l.starts_with("m=audio")).unwrap();
        assert_eq!(lines[audio + 2], "a=mid:0");
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn bitrate_only_on_trailing_section() {
        let sdp = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";
        let constraints = MediaConstraints {
            audio: EncodingConstraints {
                max_bitrate: Some(64_500),
                max_framerate: None,
            },
            ..Default::default()
        };
        assert_eq!(
            apply_encoding_constraints(sdp, &constraints),
            "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nb=AS:65\r\nb=TIAS:64500\r\n"
        );
    }
}
