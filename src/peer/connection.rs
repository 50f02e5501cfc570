use crate::error::{Error, Result};
use crate::logger::dump_selected_pair;
use crate::media::sink::RemoteTrack;
use crate::media::source::LocalMedia;
use crate::peer::codec::{
    apply_encoding_constraints, preferred_codecs, register_codecs, track_codecs,
};
use crate::peer::ice::{analyze_candidates, candidate_from_rtc, default_ice_servers, get_user_ice_servers};
use crate::peer::state::{TransportState, GATHERING_TIMEOUT};
use crate::peer::transport::{
    CandidateHandler, RemoteTrackHandler, StateHandler, Transport, TransportFactory,
    TransportRequest,
};
use crate::peer::types::{IceCandidate, MediaConstraints, MediaKind, Mode, ServerConfig, TrackInfo};
use crate::stats::{RawStats, RawTrackStats};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::timeout;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

type Slot<T> = Mutex<Option<Arc<T>>>;

/// Callbacks installed by the negotiator/orchestrator. Cloned out of the
/// slot before being called.
#[derive(Default)]
struct Handlers {
    candidate: Slot<dyn Fn(Option<IceCandidate>) + Send + Sync>,
    state: Slot<dyn Fn(TransportState) + Send + Sync>,
    track: Slot<dyn Fn(RemoteTrack) + Send + Sync>,
}

impl Handlers {
    fn clear(&self) {
        self.candidate.lock().unwrap().take();
        self.state.lock().unwrap().take();
        self.track.lock().unwrap().take();
    }
}

fn media_kind(kind: RTPCodecType) -> Option<MediaKind> {
    match kind {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        _ => None,
    }
}

fn transceiver_init(direction: RTCRtpTransceiverDirection) -> Option<RTCRtpTransceiverInit> {
    Some(RTCRtpTransceiverInit {
        direction,
        send_encodings: vec![],
    })
}

/// Peer connection configuration; falls back to the default STUN server
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let ice_servers = if servers.is_empty() {
        get_user_ice_servers(&default_ice_servers())
    } else {
        get_user_ice_servers(servers)
    };

    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// [`Transport`] backed by a `webrtc` peer connection.
pub struct WebRtcTransport {
    mode: Mode,
    pc: Arc<RTCPeerConnection>,
    constraints: MediaConstraints,
    media: Arc<Mutex<LocalMedia>>,
    handlers: Arc<Handlers>,
    closed: AtomicBool,
}

impl WebRtcTransport {
    pub async fn create(request: TransportRequest) -> Result<Arc<Self>> {
        let TransportRequest {
            mode,
            media,
            constraints,
            ice_servers,
        } = request;
        if mode == Mode::Publish && media.is_empty() {
            return Err(Error::MediaAcquisition("nothing to publish".into()));
        }
        for local in media.tracks() {
            let mime = local.track.codec().mime_type;
            if track_codecs(local.kind, &mime).is_empty() {
                return Err(Error::MediaAcquisition(format!(
                    "{} track uses unsupported codec {mime}",
                    local.kind
                )));
            }
        }

        let mut media_engine = MediaEngine::default();
        register_codecs(&mut media_engine)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&ice_servers)).await?);

        match mode {
            Mode::Publish => {
                for local in media.tracks() {
                    let codecs = track_codecs(local.kind, &local.track.codec().mime_type);
                    let transceiver = pc
                        .add_transceiver_from_track(
                            Arc::clone(&local.track) as Arc<dyn TrackLocal + Send + Sync>,
                            transceiver_init(RTCRtpTransceiverDirection::Sendonly),
                        )
                        .await?;
                    transceiver.set_codec_preferences(codecs).await?;

                    // RTCP has to be read for the interceptors to work
                    let sender = transceiver.sender().await;
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 1500];
                        while sender.read(&mut buf).await.is_ok() {}
                    });
                }
            }
            Mode::View => {
                for kind in MediaKind::ALL {
                    let transceiver = pc
                        .add_transceiver_from_kind(
                            kind.into(),
                            transceiver_init(RTCRtpTransceiverDirection::Recvonly),
                        )
                        .await?;
                    transceiver
                        .set_codec_preferences(preferred_codecs(kind, &constraints))
                        .await?;
                }
            }
        }

        let transport = Arc::new(Self {
            mode,
            pc,
            constraints,
            media: Arc::new(Mutex::new(media)),
            handlers: Arc::new(Handlers::default()),
            closed: AtomicBool::new(false),
        });
        transport.register_callbacks();
        Ok(transport)
    }

    fn register_callbacks(&self) {
        let handlers = self.handlers.clone();
        let gathered: Arc<Mutex<Vec<IceCandidate>>> = Arc::default();
        self.pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            // Some(None) is the end of gathering
            let event = match cand {
                Some(c) => candidate_from_rtc(&c).map(Some),
                None => {
                    info!("ICE candidate gathering completed");
                    analyze_candidates(&gathered.lock().unwrap());
                    Some(None)
                }
            };
            if let Some(candidate) = event {
                if let Some(c) = &candidate {
                    gathered.lock().unwrap().push(c.clone());
                }
                let handler = handlers.candidate.lock().unwrap().clone();
                if let Some(handler) = handler {
                    handler(candidate);
                }
            }
            Box::pin(async {})
        }));

        self.pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {state:?}");
            Box::pin(async {})
        }));

        let handlers = self.handlers.clone();
        let media = self.media.clone();
        let pc = Arc::downgrade(&self.pc);
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                info!("Peer connection state changed to: {st}");
                match st {
                    RTCPeerConnectionState::Connected => media.lock().unwrap().start(),
                    RTCPeerConnectionState::Failed => {
                        if let Some(pc) = pc.upgrade() {
                            tokio::spawn(async move {
                                dump_selected_pair(&pc, "BEFORE-FAIL").await;
                            });
                        }
                    }
                    _ => {}
                }
                let handler = handlers.state.lock().unwrap().clone();
                if let Some(handler) = handler {
                    handler(st.into());
                }
                Box::pin(async {})
            }));

        let handlers = self.handlers.clone();
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            if let Some(kind) = media_kind(track.kind()) {
                let info = TrackInfo {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                    mime_type: track.codec().capability.mime_type,
                };
                info!("Remote {} track {} ({})", info.kind, info.id, info.mime_type);
                let handler = handlers.track.lock().unwrap().clone();
                if let Some(handler) = handler {
                    handler(RemoteTrack { info, track });
                }
            }
            Box::pin(async {})
        }));
    }

    /// codec id -> mime type of what each kind is actually carrying,
    /// plus the id chosen per kind.
    async fn active_codecs(&self) -> (HashMap<String, String>, HashMap<MediaKind, String>) {
        let mut table = HashMap::new();
        let mut chosen = HashMap::new();
        match self.mode {
            Mode::Publish => {
                let media = self.media.lock().unwrap();
                for local in media.tracks() {
                    let id = format!("{}-out", local.kind);
                    table.insert(id.clone(), local.track.codec().mime_type);
                    chosen.entry(local.kind).or_insert(id);
                }
            }
            Mode::View => {
                for transceiver in self.pc.get_transceivers().await {
                    let Some(kind) = media_kind(transceiver.kind()) else {
                        continue;
                    };
                    let tracks = transceiver.receiver().await.tracks().await;
                    if let Some(track) = tracks.first() {
                        let codec = track.codec();
                        let id = format!("{kind}-{}", codec.payload_type);
                        table.insert(id.clone(), codec.capability.mime_type);
                        chosen.entry(kind).or_insert(id);
                    }
                }
            }
        }
        (table, chosen)
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    fn mode(&self) -> Mode {
        self.mode
    }

    async fn create_local_offer(&self, wait_for_gathering: bool) -> Result<String> {
        let offer = self.pc.create_offer(None).await?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;

        if wait_for_gathering && timeout(GATHERING_TIMEOUT, gathered.recv()).await.is_err() {
            warn!(
                "ICE gathering still running after {}s, sending what we have",
                GATHERING_TIMEOUT.as_secs()
            );
        }

        let sdp = self
            .pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .ok_or_else(|| Error::negotiation("no local description"))?;
        Ok(apply_encoding_constraints(&sdp, &self.constraints))
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_owned())?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    fn connection_state(&self) -> TransportState {
        self.pc.connection_state().into()
    }

    fn on_local_candidate(&self, handler: CandidateHandler) {
        *self.handlers.candidate.lock().unwrap() = Some(Arc::from(handler));
    }

    fn on_connection_state_change(&self, handler: StateHandler) {
        *self.handlers.state.lock().unwrap() = Some(Arc::from(handler));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        *self.handlers.track.lock().unwrap() = Some(Arc::from(handler));
    }

    async fn raw_stats(&self) -> Result<RawStats> {
        let (codecs, chosen) = self.active_codecs().await;
        let report = self.pc.get_stats().await;

        let mut tracks = Vec::new();
        for (_, entry) in report.reports {
            let (kind, bytes) = match (entry, self.mode) {
                (StatsReportType::InboundRTP(s), Mode::View) => (s.kind, s.bytes_received),
                (StatsReportType::OutboundRTP(s), Mode::Publish) => (s.kind, s.bytes_sent),
                _ => continue,
            };
            let kind = match kind.as_str() {
                "audio" => MediaKind::Audio,
                "video" => MediaKind::Video,
                _ => continue,
            };
            let mut track = RawTrackStats::new(kind, bytes);
            track.codec_id = chosen.get(&kind).cloned();
            tracks.push(track);
        }

        Ok(RawStats {
            tracks,
            codecs,
            ice_state: Some(self.pc.ice_connection_state().to_string()),
            dtls_state: Some(self.pc.connection_state().to_string()),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.handlers.clear();
        self.media.lock().unwrap().release();
        self.pc.close().await?;
        debug!("Peer connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Builds real peer connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcFactory;

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn create(&self, request: TransportRequest) -> Result<Arc<dyn Transport>> {
        let transport: Arc<dyn Transport> = WebRtcTransport::create(request).await?;
        Ok(transport)
    }
}
