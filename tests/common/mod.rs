#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;
use whipctl_lib::error::{Error, Result};
use whipctl_lib::logger::Emitter;
use whipctl_lib::media::source::{LocalMedia, MediaSource};
use whipctl_lib::negotiator::{Negotiator, StartRequest};
use whipctl_lib::peer::state::TransportState;
use whipctl_lib::peer::transport::{
    CandidateHandler, RemoteTrackHandler, StateHandler, Transport, TransportFactory,
    TransportRequest,
};
use whipctl_lib::peer::types::{IceCandidate, MediaConstraints, MediaKind, Mode};
use whipctl_lib::signaling::{AnswerUpdate, OfferResponse, Signaling, TrickleOutcome};
use whipctl_lib::stats::{RawStats, RawTrackStats};

pub const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
                         m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\n\
                         a=ice-ufrag:fakeufrag\r\na=ice-pwd:fakepassword\r\n\
                         a=mid:0\r\na=rtpmap:96 VP8/90000\r\n";

pub const ANSWER: &str = "v=0\r\no=- 4215775240449105457 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
                          m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\n\
                          a=rtpmap:96 VP8/90000\r\n";

pub const ENDPOINT: &str = "https://media.example.com/whip/endpoint";
pub const RESOURCE: &str = "https://media.example.com/whip/resource/1";

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 192.0.2.1 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

pub fn request(mode: Mode, trickle: bool) -> StartRequest {
    StartRequest {
        mode,
        endpoint: Url::parse(ENDPOINT).unwrap(),
        auth_token: Some("secret".into()),
        trickle,
    }
}

pub fn negotiator(signaling: Arc<FakeSignaling>) -> (Negotiator, Emitter) {
    let emitter = Emitter::new();
    let negotiator = Negotiator::new(signaling, emitter.clone(), Duration::from_secs(1));
    (negotiator, emitter)
}

/// Polls `cond`, sleeping between tries. Works with paused time too.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// ---------- signaling ----------

pub struct FakeSignaling {
    gate: Option<Arc<Notify>>,
    pub offer_seen: Notify,
    pub offer_error: Mutex<Option<String>>,
    pub renegotiate_error: Mutex<Option<String>>,
    pub trickle_outcome: Mutex<TrickleOutcome>,
    /// This many trickle PATCHes fail before any is accepted.
    pub trickle_failures: AtomicUsize,
    pub offers: Mutex<Vec<String>>,
    pub trickles: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<Url>>,
    pub renegotiations: Mutex<Vec<String>>,
}

impl FakeSignaling {
    fn build(gate: Option<Arc<Notify>>) -> Self {
        Self {
            gate,
            offer_seen: Notify::new(),
            offer_error: Mutex::new(None),
            renegotiate_error: Mutex::new(None),
            trickle_outcome: Mutex::new(TrickleOutcome::Accepted),
            trickle_failures: AtomicUsize::new(0),
            offers: Mutex::default(),
            trickles: Mutex::default(),
            deletes: Mutex::default(),
            renegotiations: Mutex::default(),
        }
    }

    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// The POST response is held back until the returned notify fires.
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (Arc::new(Self::build(Some(gate.clone()))), gate)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        let s = Self::build(None);
        *s.offer_error.lock().unwrap() = Some(message.to_owned());
        Arc::new(s)
    }

    pub fn trickles(&self) -> Vec<String> {
        self.trickles.lock().unwrap().clone()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn offer(&self, _endpoint: &Url, _token: Option<&str>, sdp: &str) -> Result<OfferResponse> {
        self.offers.lock().unwrap().push(sdp.to_owned());
        self.offer_seen.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = self.offer_error.lock().unwrap().clone() {
            return Err(Error::Negotiation(message));
        }
        Ok(OfferResponse {
            answer_sdp: ANSWER.to_owned(),
            resource_url: Url::parse(RESOURCE).unwrap(),
            etag: Some("\"v1\"".into()),
            ice_servers: vec![],
            trickle_url: None,
        })
    }

    async fn trickle(
        &self,
        _url: &Url,
        _token: Option<&str>,
        _etag: Option<&str>,
        body: &str,
    ) -> Result<TrickleOutcome> {
        let failing = self
            .trickle_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Negotiation(
                "trickle PATCH answered 503 Service Unavailable".into(),
            ));
        }
        self.trickles.lock().unwrap().push(body.to_owned());
        Ok(*self.trickle_outcome.lock().unwrap())
    }

    async fn renegotiate(
        &self,
        _url: &Url,
        _token: Option<&str>,
        _etag: Option<&str>,
        sdp: &str,
    ) -> Result<AnswerUpdate> {
        self.renegotiations.lock().unwrap().push(sdp.to_owned());
        if let Some(message) = self.renegotiate_error.lock().unwrap().clone() {
            return Err(Error::Negotiation(message));
        }
        Ok(AnswerUpdate {
            answer_sdp: ANSWER.to_owned(),
            etag: Some("\"v2\"".into()),
        })
    }

    async fn terminate(&self, url: &Url, _token: Option<&str>) -> Result<()> {
        self.deletes.lock().unwrap().push(url.clone());
        Ok(())
    }
}

// ---------- transport ----------

type Shared<T> = Mutex<Option<Arc<T>>>;

pub struct FakeTransport {
    mode: Mode,
    state: Mutex<TransportState>,
    candidate_handler: Shared<dyn Fn(Option<IceCandidate>) + Send + Sync>,
    state_handler: Shared<dyn Fn(TransportState) + Send + Sync>,
    track_handler: Shared<dyn Fn(whipctl_lib::media::sink::RemoteTrack) + Send + Sync>,
    closed: AtomicBool,
    pub fail_answer: AtomicBool,
    pub offers: AtomicUsize,
    pub answers: Mutex<Vec<String>>,
    pub closes: AtomicUsize,
    pub stats_calls: AtomicUsize,
    bytes: AtomicU64,
}

impl FakeTransport {
    pub fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            state: Mutex::new(TransportState::New),
            candidate_handler: Mutex::new(None),
            state_handler: Mutex::new(None),
            track_handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            fail_answer: AtomicBool::new(false),
            offers: AtomicUsize::new(0),
            answers: Mutex::default(),
            closes: AtomicUsize::new(0),
            stats_calls: AtomicUsize::new(0),
            bytes: AtomicU64::new(0),
        })
    }

    pub fn emit_candidate(&self, candidate: Option<IceCandidate>) {
        let handler = self.candidate_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(candidate);
        }
    }

    pub fn set_state(&self, state: TransportState) {
        *self.state.lock().unwrap() = state;
        let handler = self.state_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(state);
        }
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn stats_count(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn has_remote_track_handler(&self) -> bool {
        self.track_handler.lock().unwrap().is_some()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn mode(&self) -> Mode {
        self.mode
    }

    async fn create_local_offer(&self, _wait_for_gathering: bool) -> Result<String> {
        self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(OFFER.to_owned())
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("engine rejected answer".into()));
        }
        self.answers.lock().unwrap().push(sdp.to_owned());
        Ok(())
    }

    fn connection_state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    fn on_local_candidate(&self, handler: CandidateHandler) {
        *self.candidate_handler.lock().unwrap() = Some(Arc::from(handler));
    }

    fn on_connection_state_change(&self, handler: StateHandler) {
        *self.state_handler.lock().unwrap() = Some(Arc::from(handler));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        *self.track_handler.lock().unwrap() = Some(Arc::from(handler));
    }

    async fn raw_stats(&self) -> Result<RawStats> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let bytes = self.bytes.fetch_add(25_000, Ordering::SeqCst) + 25_000;
        Ok(RawStats {
            tracks: vec![RawTrackStats::new(MediaKind::Video, bytes)],
            ..Default::default()
        })
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ---------- factory / media ----------

#[derive(Default)]
pub struct FakeFactory {
    pub created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeFactory {
    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        self.created.lock().unwrap().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(&self, request: TransportRequest) -> Result<Arc<dyn Transport>> {
        let transport = FakeTransport::new(request.mode);
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

#[derive(Default)]
pub struct FakeMediaSource {
    pub unavailable: bool,
    pub acquired: AtomicUsize,
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<LocalMedia> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(Error::MediaAcquisition("camera busy".into()));
        }
        Ok(LocalMedia::default())
    }
}
