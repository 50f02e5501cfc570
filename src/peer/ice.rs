use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use log::{debug, warn};
use std::collections::VecDeque;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;

pub const TRICKLE_CONTENT_TYPE: &str = "application/trickle-ice-sdpfrag";

/// One unit of trickle delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrickleFragment {
    Candidate(IceCandidate),
    /// Gathering finished; tells the server no more candidates follow.
    EndOfCandidates,
}

/// Candidates waiting for the resource URL, kept in discovery order.
#[derive(Debug, Default)]
pub struct CandidateBatch {
    queue: VecDeque<TrickleFragment>,
}

impl CandidateBatch {
    pub fn push(&mut self, fragment: TrickleFragment) {
        self.queue.push_back(fragment);
    }

    /// Returns a fragment to the head of the batch so it goes out next.
    pub fn push_front(&mut self, fragment: TrickleFragment) {
        self.queue.push_front(fragment);
    }

    pub fn pop_front(&mut self) -> Option<TrickleFragment> {
        self.queue.pop_front()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// ICE username fragment and password of the local description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCredentials {
    pub ufrag: String,
    pub pwd: String,
}

impl IceCredentials {
    pub fn from_sdp(sdp: &str) -> Option<Self> {
        let mut ufrag = None;
        let mut pwd = None;
        for line in sdp.lines().map(str::trim) {
            if ufrag.is_none() {
                ufrag = line.strip_prefix("a=ice-ufrag:").map(str::to_owned);
            }
            if pwd.is_none() {
                pwd = line.strip_prefix("a=ice-pwd:").map(str::to_owned);
            }
        }
        Some(Self {
            ufrag: ufrag?,
            pwd: pwd?,
        })
    }
}

/// Encodes a fragment as an `application/trickle-ice-sdpfrag` body.
pub fn to_sdpfrag(credentials: Option<&IceCredentials>, fragment: &TrickleFragment) -> String {
    let mut body = String::new();
    if let Some(c) = credentials {
        body.push_str(&format!("a=ice-ufrag:{}\r\na=ice-pwd:{}\r\n", c.ufrag, c.pwd));
    }
    match fragment {
        TrickleFragment::Candidate(cand) => {
            let mid = cand
                .sdp_mid
                .clone()
                .or_else(|| cand.sdp_mline_index.map(|i| i.to_string()))
                .unwrap_or_else(|| "0".to_owned());
            let line = cand.candidate.strip_prefix("a=").unwrap_or(&cand.candidate);
            body.push_str(&format!("m=audio 9 RTP/AVP 0\r\na=mid:{mid}\r\na={line}\r\n"));
        }
        TrickleFragment::EndOfCandidates => body.push_str("a=end-of-candidates\r\n"),
    }
    body
}

/// Converts an engine candidate into the value we trickle.
pub fn candidate_from_rtc(cand: &RTCIceCandidate) -> Option<IceCandidate> {
    match cand.to_json() {
        Ok(init) => Some(IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }),
        Err(e) => {
            warn!("Failed to serialize local candidate: {e}");
            None
        }
    }
}

/// Builds engine ICE servers from the configured list
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![ServerConfig {
        r#type: "stun".into(),
        url: "stun:stun.l.google.com:19302".into(),
        username: None,
        credential: None,
    }]
}

/// Counts gathered candidates per type, for the logs.
pub fn analyze_candidates(candidates: &[IceCandidate]) -> (usize, usize, usize) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );

    (host_count, srflx_count, relay_count)
}
