use super::{not_active, Orchestrator};
use crate::error::Result;
use crate::session::SessionState;
use log::warn;

impl Orchestrator {
    /// Manual disconnect. Does nothing without an active session.
    pub async fn stop(&self) {
        if let Some(active) = self.active() {
            active.negotiator.stop(&active.handle).await;
        }
    }

    /// True once the active session is Connected.
    pub fn is_connected(&self) -> bool {
        self.state() == Some(SessionState::Connected)
    }

    pub fn state(&self) -> Option<SessionState> {
        self.active().map(|a| a.handle.state())
    }

    /// Message of the error that ended the current attempt, if any.
    pub fn last_error(&self) -> Option<String> {
        self.emitter.last_error()
    }

    /// A refused renegotiation leaves the session Connected, so the error
    /// goes back to the caller and the log, not to the attempt's error slot.
    pub async fn renegotiate(&self) -> Result<()> {
        let active = self.active().ok_or_else(not_active)?;
        let result = active.negotiator.renegotiate(&active.handle).await;
        if let Err(e) = &result {
            warn!("Renegotiation refused: {e}");
        }
        result
    }
}
