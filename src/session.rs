use serde::Serialize;
use url::Url;

use crate::peer::ice::{CandidateBatch, IceCredentials};
use crate::peer::types::{Mode, ServerConfig};
use crate::utils::random_id;

/// Lifecycle of one publish/view attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Negotiating,
    Connected,
    Renegotiating,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }

    /// Closed and Failed sessions accept no more work.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Negotiating) => true,
            (Negotiating, Connected) => true,
            (Connected, Renegotiating) => true,
            (Renegotiating, Connected) => true,
            (Negotiating | Connected | Renegotiating, Failed) => true,
            // stop() may arrive at any point before the session is closed
            (Idle | Negotiating | Connected | Renegotiating | Failed, Closed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: SessionState,
    pub attempted: SessionState,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition to {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// One WHIP or WHEP session as seen by the negotiator.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub mode: Mode,
    pub endpoint: Url,
    pub auth_token: Option<String>,
    /// Per-session resource from the `Location` header of the 201.
    pub resource_url: Option<Url>,
    /// PATCH target advertised through a `Link` header, if any.
    pub trickle_url: Option<Url>,
    pub etag: Option<String>,
    /// ICE servers the endpoint advertised with `rel="ice-server"`.
    pub ice_servers: Vec<ServerConfig>,
    pub ice_credentials: Option<IceCredentials>,
    pub pending: CandidateBatch,
    pub trickle_enabled: bool,
    /// Set while one task drains `pending`; keeps deliveries in order.
    pub flushing: bool,
    pub was_connected: bool,
    state: SessionState,
}

impl Session {
    pub fn new(mode: Mode, endpoint: Url, auth_token: Option<String>) -> Self {
        Self {
            id: random_id(),
            mode,
            endpoint,
            auth_token,
            resource_url: None,
            trickle_url: None,
            etag: None,
            ice_servers: Vec::new(),
            ice_credentials: None,
            pending: CandidateBatch::default(),
            trickle_enabled: true,
            flushing: false,
            was_connected: false,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                current_state: self.state,
                attempted: next,
            });
        }
        if next == SessionState::Connected {
            // a Connected session always knows where its resource lives
            if self.resource_url.is_none() {
                return Err(InvalidTransition {
                    current_state: self.state,
                    attempted: next,
                });
            }
            self.was_connected = true;
        }
        if next.is_terminal() {
            self.pending.clear();
            self.flushing = false;
        }
        self.state = next;
        Ok(())
    }

    /// Where trickle PATCHes go: the advertised link, else the resource.
    pub fn trickle_target(&self) -> Option<&Url> {
        self.trickle_url.as_ref().or(self.resource_url.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::ice::TrickleFragment;
    use crate::peer::types::IceCandidate;

    fn session() -> Session {
        Session::new(
            Mode::Publish,
            Url::parse("https://example.com/whip").unwrap(),
            None,
        )
    }

    #[test]
    fn happy_path_transitions() {
        let mut s = session();
        s.transition(SessionState::Negotiating).unwrap();
        s.resource_url = Some(Url::parse("https://example.com/whip/abc").unwrap());
        s.transition(SessionState::Connected).unwrap();
        s.transition(SessionState::Renegotiating).unwrap();
        s.transition(SessionState::Connected).unwrap();
        s.transition(SessionState::Failed).unwrap();
        s.transition(SessionState::Closed).unwrap();
        assert!(s.was_connected);
    }

    #[test]
    fn connected_requires_resource_url() {
        let mut s = session();
        s.transition(SessionState::Negotiating).unwrap();
        let err = s.transition(SessionState::Connected).unwrap_err();
        assert_eq!(err.attempted, SessionState::Connected);
        assert_eq!(s.state(), SessionState::Negotiating);
    }

    #[test]
    fn closed_is_final() {
        let mut s = session();
        s.transition(SessionState::Closed).unwrap();
        assert!(s.transition(SessionState::Negotiating).is_err());
        assert!(s.transition(SessionState::Closed).is_err());
    }

    #[test]
    fn closing_drops_pending_candidates() {
        let mut s = session();
        s.transition(SessionState::Negotiating).unwrap();
        s.pending.push(TrickleFragment::Candidate(IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }));
        s.transition(SessionState::Closed).unwrap();
        assert!(s.pending.is_empty());
    }

    #[test]
    fn trickle_target_prefers_link() {
        let mut s = session();
        s.resource_url = Some(Url::parse("https://example.com/whip/abc").unwrap());
        assert_eq!(s.trickle_target().unwrap().path(), "/whip/abc");
        s.trickle_url = Some(Url::parse("https://example.com/ice/abc").unwrap());
        assert_eq!(s.trickle_target().unwrap().path(), "/ice/abc");
    }
}
