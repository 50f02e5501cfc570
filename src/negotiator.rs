//! Session Negotiator: drives one WHIP/WHEP session through
//! Idle -> Negotiating -> Connected (<-> Renegotiating) -> Closed,
//! with Failed as the detour taken when the transport dies.
//!
//! All session bookkeeping sits behind one mutex that is never held across
//! an `.await`; network calls work on values copied out of it and re-check
//! the state when they come back, so a `stop` issued meanwhile always wins.

use crate::error::{Error, Result};
use crate::logger::{dump_candidate, Emitter};
use crate::peer::ice::{to_sdpfrag, IceCredentials, TrickleFragment};
use crate::peer::state::{TransportState, TRICKLE_RETRY_INITIAL, TRICKLE_RETRY_MAX};
use crate::peer::transport::Transport;
use crate::peer::types::{IceCandidate, Mode, ServerConfig};
use crate::session::{Session, SessionState};
use crate::signaling::{Signaling, TrickleOutcome};
use crate::stats::{SamplerHandle, StatsSampler, TransportStats};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use url::Url;

/// Parameters of one publish/view attempt.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub mode: Mode,
    pub endpoint: Url,
    pub auth_token: Option<String>,
    /// false: send a complete offer and never PATCH candidates.
    pub trickle: bool,
}

struct Inner {
    session: Mutex<Session>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    sampler: Mutex<Option<SamplerHandle>>,
}

/// Shared reference to a session owned by the negotiator.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap()
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.transport.lock().unwrap().clone()
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn id(&self) -> String {
        self.session().id.clone()
    }

    pub fn mode(&self) -> Mode {
        self.session().mode
    }

    pub fn state(&self) -> SessionState {
        self.session().state()
    }

    pub fn resource_url(&self) -> Option<Url> {
        self.session().resource_url.clone()
    }

    pub fn ice_servers(&self) -> Vec<ServerConfig> {
        self.session().ice_servers.clone()
    }

    pub fn trickle_enabled(&self) -> bool {
        self.session().trickle_enabled
    }

    pub fn pending_candidates(&self) -> usize {
        self.session().pending.len()
    }

    pub fn is_sampling(&self) -> bool {
        self.inner
            .sampler
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| !s.is_finished())
    }

    pub fn has_transport(&self) -> bool {
        self.inner.transport.lock().unwrap().is_some()
    }
}

/// Everything `stop` needs once the session lock is released.
struct Teardown {
    session_id: String,
    resource_url: Option<Url>,
    auth_token: Option<String>,
    transport: Option<Arc<dyn Transport>>,
}

#[derive(Clone)]
pub struct Negotiator {
    signaling: Arc<dyn Signaling>,
    emitter: Emitter,
    stats_interval: Duration,
}

impl Negotiator {
    pub fn new(signaling: Arc<dyn Signaling>, emitter: Emitter, stats_interval: Duration) -> Self {
        Self {
            signaling,
            emitter,
            stats_interval,
        }
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Creates an Idle session bound to `transport`. Nothing goes on the wire
    /// until [`Negotiator::negotiate`].
    pub fn prepare(&self, request: StartRequest, transport: Arc<dyn Transport>) -> SessionHandle {
        let mut session = Session::new(request.mode, request.endpoint, request.auth_token);
        session.trickle_enabled = request.trickle;
        debug!(
            "Prepared {} session {} for {}",
            request.mode.protocol(),
            session.id,
            session.endpoint
        );
        SessionHandle {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                transport: Mutex::new(Some(transport)),
                sampler: Mutex::new(None),
            }),
        }
    }

    /// `prepare` followed by `negotiate`.
    pub async fn start(
        &self,
        request: StartRequest,
        transport: Arc<dyn Transport>,
    ) -> Result<SessionHandle> {
        let handle = self.prepare(request, transport);
        self.negotiate(&handle).await?;
        Ok(handle)
    }

    /// Runs the offer/answer exchange. On error the session is stopped and
    /// its transport closed before the error is returned.
    pub async fn negotiate(&self, handle: &SessionHandle) -> Result<()> {
        let id = {
            let mut s = handle.session();
            s.transition(SessionState::Negotiating)?;
            s.id.clone()
        };
        self.emitter.emit_state(&id, SessionState::Negotiating);

        let Some(transport) = handle.transport() else {
            return Err(Error::negotiation("session closed during negotiation"));
        };
        self.wire(handle, &transport);

        let result = self.exchange(handle, &transport).await;
        if result.is_err() {
            self.stop(handle).await;
            if let Err(e) = transport.close().await {
                warn!("Closing transport after failed negotiation: {e}");
            }
        }
        result
    }

    fn wire(&self, handle: &SessionHandle, transport: &Arc<dyn Transport>) {
        let this = self.clone();
        let weak = handle.downgrade();
        transport.on_local_candidate(Box::new(move |candidate: Option<IceCandidate>| {
            let Some(handle) = SessionHandle::upgrade(&weak) else {
                return;
            };
            let fragment = match candidate {
                Some(c) => TrickleFragment::Candidate(c),
                None => TrickleFragment::EndOfCandidates,
            };
            if this.enqueue(&handle, fragment) {
                let this = this.clone();
                tokio::spawn(async move { this.flush(&handle).await });
            }
        }));

        let this = self.clone();
        let weak = handle.downgrade();
        transport.on_connection_state_change(Box::new(move |state: TransportState| {
            if let Some(handle) = SessionHandle::upgrade(&weak) {
                this.on_transport_state(&handle, state);
            }
        }));
    }

    async fn exchange(&self, handle: &SessionHandle, transport: &Arc<dyn Transport>) -> Result<()> {
        let (endpoint, token, trickle) = {
            let s = handle.session();
            (s.endpoint.clone(), s.auth_token.clone(), s.trickle_enabled)
        };

        let offer = transport
            .create_local_offer(!trickle)
            .await
            .map_err(|e| Error::negotiation(format!("creating offer: {e}")))?;
        handle.session().ice_credentials = IceCredentials::from_sdp(&offer);

        let response = self.signaling.offer(&endpoint, token.as_deref(), &offer).await?;

        {
            let mut s = handle.session();
            if s.state() != SessionState::Negotiating {
                drop(s);
                // the server created a resource nobody will use
                self.spawn_delete(response.resource_url, token);
                return Err(Error::negotiation("session closed during negotiation"));
            }
            s.resource_url = Some(response.resource_url);
            s.trickle_url = response.trickle_url;
            s.etag = response.etag;
            s.ice_servers = response.ice_servers;
        }

        transport
            .set_remote_answer(&response.answer_sdp)
            .await
            .map_err(|e| Error::negotiation(format!("malformed SDP answer: {e}")))?;

        if handle.state().is_terminal() {
            return Err(Error::negotiation("session closed during negotiation"));
        }
        if transport.connection_state() == TransportState::Connected {
            self.enter_connected(handle);
        }

        self.flush(handle).await;
        Ok(())
    }

    fn spawn_delete(&self, url: Url, token: Option<String>) {
        let signaling = self.signaling.clone();
        tokio::spawn(async move {
            if let Err(e) = signaling.terminate(&url, token.as_deref()).await {
                warn!("{e}");
            }
        });
    }

    /// Queues a candidate and delivers everything deliverable.
    pub async fn send_local_candidate(&self, handle: &SessionHandle, candidate: IceCandidate) {
        if self.enqueue(handle, TrickleFragment::Candidate(candidate)) {
            self.flush(handle).await;
        }
    }

    /// Appends to the batch; candidates of closed or non-trickle sessions
    /// are dropped.
    fn enqueue(&self, handle: &SessionHandle, fragment: TrickleFragment) -> bool {
        let mut s = handle.session();
        if s.state().is_terminal() || !s.trickle_enabled {
            debug!("Session {}: dropping {:?}", s.id, fragment);
            return false;
        }
        s.pending.push(fragment);
        true
    }

    /// Drains the batch in order. At most one drainer runs per session;
    /// anything queued while it runs is picked up by the same loop.
    ///
    /// A failed PATCH puts its fragment back at the head of the batch and is
    /// retried after a growing delay. Fragments are only discarded once the
    /// server turns trickle down or the session ends.
    async fn flush(&self, handle: &SessionHandle) {
        {
            let mut s = handle.session();
            if s.flushing || s.state().is_terminal() || s.trickle_target().is_none() {
                return;
            }
            s.flushing = true;
        }

        let mut backoff = TRICKLE_RETRY_INITIAL;
        loop {
            let (fragment, target, token, etag, credentials) = {
                let mut s = handle.session();
                if s.state().is_terminal() {
                    return;
                }
                let target = s.trickle_target().cloned();
                let next = if s.trickle_enabled {
                    s.pending.pop_front()
                } else {
                    None
                };
                let (Some(fragment), Some(target)) = (next, target) else {
                    s.flushing = false;
                    return;
                };
                (
                    fragment,
                    target,
                    s.auth_token.clone(),
                    s.etag.clone(),
                    s.ice_credentials.clone(),
                )
            };

            if let TrickleFragment::Candidate(c) = &fragment {
                dump_candidate("LOCAL", c);
            }
            let body = to_sdpfrag(credentials.as_ref(), &fragment);
            match self
                .signaling
                .trickle(&target, token.as_deref(), etag.as_deref(), &body)
                .await
            {
                Ok(TrickleOutcome::Accepted) => backoff = TRICKLE_RETRY_INITIAL,
                Ok(TrickleOutcome::Unsupported) => {
                    info!("Server does not support trickle ICE; relying on the offer's candidates");
                    let mut s = handle.session();
                    s.trickle_enabled = false;
                    s.pending.clear();
                }
                Err(e) => {
                    warn!("ICE fragment not delivered, retrying in {backoff:?}: {e}");
                    {
                        let mut s = handle.session();
                        if s.state().is_terminal() {
                            return;
                        }
                        if s.trickle_enabled {
                            s.pending.push_front(fragment);
                        }
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(TRICKLE_RETRY_MAX);
                }
            }
        }
    }

    /// Reacts to the transport's connectivity reports.
    pub fn on_transport_state(&self, handle: &SessionHandle, state: TransportState) {
        let id = handle.id();
        self.emitter.emit_transport(&id, state);
        match state {
            TransportState::Connected => self.enter_connected(handle),
            TransportState::Disconnected => {
                warn!("Session {id}: transport disconnected, waiting for it to recover");
            }
            TransportState::Failed => self.fail(handle, "ICE/DTLS transport failed"),
            TransportState::Closed => self.fail(handle, "peer connection closed"),
            TransportState::New | TransportState::Connecting => {}
        }
    }

    fn enter_connected(&self, handle: &SessionHandle) {
        let id = {
            let mut s = handle.session();
            if s.state() != SessionState::Negotiating || s.resource_url.is_none() {
                return;
            }
            if let Err(e) = s.transition(SessionState::Connected) {
                warn!("{e}");
                return;
            }
            self.start_sampler(handle, &s);
            s.id.clone()
        };
        self.emitter.emit_state(&id, SessionState::Connected);
    }

    /// Must be called with the session locked and Connected, so a concurrent
    /// stop cannot miss the new sampler.
    fn start_sampler(&self, handle: &SessionHandle, session: &Session) {
        if session.state() != SessionState::Connected {
            return;
        }
        let Some(transport) = handle.transport() else {
            return;
        };
        let emitter = self.emitter.clone();
        let sampler = StatsSampler::new(Arc::new(TransportStats::new(transport)), self.stats_interval)
            .spawn(move |snapshot| emitter.emit_stats(snapshot));
        if let Some(old) = handle.inner.sampler.lock().unwrap().replace(sampler) {
            old.cancel();
        }
    }

    fn stop_sampler(&self, handle: &SessionHandle) {
        if let Some(sampler) = handle.inner.sampler.lock().unwrap().take() {
            sampler.cancel();
        }
    }

    /// Failed, then straight on to Closed. The Closed transition happens
    /// before this returns; the network part of the teardown is spawned.
    fn fail(&self, handle: &SessionHandle, reason: &str) {
        let (id, was_connected) = {
            let mut s = handle.session();
            if s.state().is_terminal() || s.transition(SessionState::Failed).is_err() {
                return;
            }
            (s.id.clone(), s.was_connected)
        };
        self.emitter.emit_state(&id, SessionState::Failed);
        let err = if was_connected {
            Error::Transport(reason.to_owned())
        } else {
            Error::negotiation(reason)
        };
        self.emitter.emit_error(&err);

        if let Some(teardown) = self.begin_stop(handle) {
            let this = self.clone();
            tokio::spawn(async move { this.finish_stop(teardown).await });
        }
    }

    /// Creates a fresh offer on a Connected session and exchanges it over
    /// PATCH. A refused offer leaves the session Connected on the old one.
    pub async fn renegotiate(&self, handle: &SessionHandle) -> Result<()> {
        let (id, target, token, etag, trickle) = {
            let mut s = handle.session();
            let target = s
                .resource_url
                .clone()
                .ok_or_else(|| Error::negotiation("no resource to renegotiate"))?;
            s.transition(SessionState::Renegotiating)?;
            (s.id.clone(), target, s.auth_token.clone(), s.etag.clone(), s.trickle_enabled)
        };
        self.stop_sampler(handle);
        self.emitter.emit_state(&id, SessionState::Renegotiating);

        let Some(transport) = handle.transport() else {
            return Err(Error::negotiation("session closed during renegotiation"));
        };

        let result = async {
            let offer = transport
                .create_local_offer(!trickle)
                .await
                .map_err(|e| Error::negotiation(format!("creating offer: {e}")))?;
            let credentials = IceCredentials::from_sdp(&offer);
            let update = self
                .signaling
                .renegotiate(&target, token.as_deref(), etag.as_deref(), &offer)
                .await?;
            transport
                .set_remote_answer(&update.answer_sdp)
                .await
                .map_err(|e| Error::negotiation(format!("malformed SDP answer: {e}")))?;
            Ok::<_, Error>((credentials, update.etag))
        }
        .await;

        {
            let mut s = handle.session();
            if s.state() != SessionState::Renegotiating {
                return Err(result
                    .err()
                    .unwrap_or_else(|| Error::negotiation("session closed during renegotiation")));
            }
            if let Ok((credentials, new_etag)) = &result {
                if credentials.is_some() {
                    s.ice_credentials = credentials.clone();
                }
                if new_etag.is_some() {
                    s.etag = new_etag.clone();
                }
            }
            s.transition(SessionState::Connected)?;
            self.start_sampler(handle, &s);
        }
        self.emitter.emit_state(&id, SessionState::Connected);
        result.map(|_| ())
    }

    /// DELETE the resource (best-effort), then close the transport.
    /// A second call does nothing.
    pub async fn stop(&self, handle: &SessionHandle) {
        if let Some(teardown) = self.begin_stop(handle) {
            self.finish_stop(teardown).await;
        }
    }

    fn begin_stop(&self, handle: &SessionHandle) -> Option<Teardown> {
        let teardown = {
            let mut s = handle.session();
            if s.state().is_closed() {
                return None;
            }
            self.stop_sampler(handle);
            if let Err(e) = s.transition(SessionState::Closed) {
                warn!("{e}");
                return None;
            }
            Teardown {
                session_id: s.id.clone(),
                resource_url: s.resource_url.clone(),
                auth_token: s.auth_token.clone(),
                transport: handle.inner.transport.lock().unwrap().take(),
            }
        };
        self.emitter.emit_state(&teardown.session_id, SessionState::Closed);
        Some(teardown)
    }

    async fn finish_stop(&self, teardown: Teardown) {
        if let Some(url) = &teardown.resource_url {
            if let Err(e) = self
                .signaling
                .terminate(url, teardown.auth_token.as_deref())
                .await
            {
                warn!("Session {}: {e}", teardown.session_id);
            }
        }
        if let Some(transport) = teardown.transport {
            if let Err(e) = transport.close().await {
                warn!("Session {}: closing transport: {e}", teardown.session_id);
            }
        }
        info!("Session {} closed", teardown.session_id);
    }
}
