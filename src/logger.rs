use crate::peer::state::TransportState;
use crate::peer::types::{IceCandidate, TrackInfo};
use crate::session::SessionState;
use crate::stats::StatsSnapshot;
use log::{debug, error, info, LevelFilter};
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

const EVENT_CAPACITY: usize = 64;

/// Installs the global logger with timestamps.
///
/// `RUST_LOG` wins over `level` when set. Calling this twice is harmless.
pub fn init(level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let now = chrono::Local::now();
            writeln!(
                buf,
                "[{}] {:<5} {}: {}",
                now.format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });
    if builder.try_init().is_err() {
        debug!("Logger already initialised");
    }
}

/// Logs an ICE candidate on its way out (trickle ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index
    );
}

/// Quick getStats snapshot of the nominated candidate pair
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

/// What the outside world (CLI, UI) hears about a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        session_id: String,
        state: SessionState,
    },
    Transport {
        session_id: String,
        state: TransportState,
    },
    Stats(StatsSnapshot),
    RemoteTrack(TrackInfo),
    Error {
        message: String,
    },
}

/// Fan-out of [`SessionEvent`]s plus the one user-facing error slot.
#[derive(Clone)]
pub struct Emitter {
    tx: broadcast::Sender<SessionEvent>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tx,
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn emit_state(&self, session_id: &str, state: SessionState) {
        info!("Session {session_id} -> {state}");
        self.emit(SessionEvent::StateChanged {
            session_id: session_id.to_owned(),
            state,
        });
    }

    pub fn emit_transport(&self, session_id: &str, state: TransportState) {
        debug!("Session {session_id} transport {state}");
        self.emit(SessionEvent::Transport {
            session_id: session_id.to_owned(),
            state,
        });
    }

    pub fn emit_stats(&self, snapshot: StatsSnapshot) {
        self.emit(SessionEvent::Stats(snapshot));
    }

    pub fn emit_remote_track(&self, info: TrackInfo) {
        self.emit(SessionEvent::RemoteTrack(info));
    }

    /// Reports an error to the user unless this attempt already reported one.
    /// Returns whether this call filled the slot.
    pub fn emit_error(&self, err: &crate::error::Error) -> bool {
        let message = err.to_string();
        {
            let mut slot = self.last_error.lock().unwrap();
            if slot.is_some() {
                debug!("Suppressed follow-up error: {message}");
                return false;
            }
            *slot = Some(message.clone());
        }
        error!("{message}");
        self.emit(SessionEvent::Error { message });
        true
    }

    /// Starts a new attempt: the previous error no longer applies.
    pub fn begin_attempt(&self) {
        *self.last_error.lock().unwrap() = None;
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }
}
