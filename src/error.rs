use thiserror::Error;

use crate::session::InvalidTransition;

/// Everything that can end (or fail to start) a publish/view attempt.
///
/// The Display strings are what the user sees, so negotiation and transport
/// failures read differently ("could not connect" vs. "connection lost").
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("media unavailable: {0}")]
    MediaAcquisition(String),

    #[error("could not connect: {0}")]
    Negotiation(String),

    #[error("connection lost: {0}")]
    Transport(String),

    /// DELETE of the resource failed. Logged, never escalated.
    #[error("teardown failed: {0}")]
    Teardown(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("rtc engine: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Failures that happen on the wire while starting a session.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Error::Negotiation(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
