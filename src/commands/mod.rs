//! Orchestrator: turns "publish this" / "view that" into a transport plus a
//! negotiated session, and keeps track of the one active session.

pub mod publish_api;
pub mod util_api;
pub mod view_api;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::logger::Emitter;
use crate::media::source::LocalMedia;
use crate::negotiator::{Negotiator, SessionHandle, StartRequest};
use crate::peer::connection::WebRtcFactory;
use crate::peer::transport::{Transport, TransportFactory, TransportRequest};
use crate::peer::types::Mode;
use crate::signaling::{HttpSignaling, Signaling};
use log::info;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Clone)]
struct ActiveSession {
    negotiator: Negotiator,
    handle: SessionHandle,
}

pub struct Orchestrator {
    signaling: Arc<dyn Signaling>,
    factory: Arc<dyn TransportFactory>,
    emitter: Emitter,
    active: Mutex<Option<ActiveSession>>,
}

impl Orchestrator {
    pub fn new(
        signaling: Arc<dyn Signaling>,
        factory: Arc<dyn TransportFactory>,
        emitter: Emitter,
    ) -> Self {
        Self {
            signaling,
            factory,
            emitter,
            active: Mutex::new(None),
        }
    }

    /// Real HTTP signaling and `webrtc` peer connections.
    pub fn with_http(request_timeout: Duration, emitter: Emitter) -> Result<Self> {
        let signaling = Arc::new(HttpSignaling::new(request_timeout)?);
        Ok(Self::new(signaling, Arc::new(WebRtcFactory), emitter))
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    fn active(&self) -> Option<ActiveSession> {
        self.active.lock().unwrap().clone()
    }

    /// Records the attempt's outcome: the first error of an attempt is the
    /// one the user sees.
    fn report(&self, result: Result<SessionHandle>) -> Result<SessionHandle> {
        if let Err(e) = &result {
            self.emitter.emit_error(e);
        }
        result
    }

    /// Builds the transport and negotiates. The session is registered as
    /// active before anything goes on the wire, so `stop` can reach it
    /// mid-negotiation.
    async fn attempt(
        &self,
        config: &SessionConfig,
        endpoint: Url,
        mode: Mode,
        media: LocalMedia,
        wire: impl FnOnce(&Arc<dyn Transport>),
    ) -> Result<SessionHandle> {
        let transport = self
            .factory
            .create(TransportRequest {
                mode,
                media,
                constraints: config.media.clone(),
                ice_servers: config.ice_servers.clone(),
            })
            .await?;
        wire(&transport);

        let negotiator = Negotiator::new(
            self.signaling.clone(),
            self.emitter.clone(),
            config.stats_interval(),
        );
        let handle = negotiator.prepare(
            StartRequest {
                mode,
                endpoint,
                auth_token: config.auth_token.clone(),
                trickle: config.trickle,
            },
            transport,
        );
        *self.active.lock().unwrap() = Some(ActiveSession {
            negotiator: negotiator.clone(),
            handle: handle.clone(),
        });

        info!("{} session {} starting", mode.protocol(), handle.id());
        negotiator.negotiate(&handle).await?;
        Ok(handle)
    }

    /// Common prologue: clears the previous error, ends any running
    /// session and validates the config before anything is allocated.
    async fn begin(&self, config: &SessionConfig) -> Result<Url> {
        self.emitter.begin_attempt();
        self.stop().await;
        config.validate()
    }
}

pub(crate) fn not_active() -> Error {
    Error::Config("no active session".into())
}
