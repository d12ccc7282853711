//! Session error taxonomy.
//!
//! Every failure inside a running session maps to one [`SessionError`]
//! variant. None of them are fatal: the orchestrator logs the error and
//! leaves the session in an explicit, recoverable state.

use std::fmt;

use crate::engine::EngineError;

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Signaling transport is missing or rejected a frame.
    Transport(String),
    /// A description step (offer, answer, apply) failed.
    Negotiation(String),
    /// A candidate could not be applied.
    Ice(String),
    /// The active channel rejected a send.
    ChannelSend(String),
    /// A file could not be opened or read.
    FileIo(String),
    /// The metrics query failed.
    Stats(String),
    /// No session exists for an operation that needs one.
    NoSession,
    /// The peer connection is not connected yet.
    NotConnected,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::Negotiation(msg) => write!(f, "Negotiation error: {msg}"),
            Self::Ice(msg) => write!(f, "ICE error: {msg}"),
            Self::ChannelSend(msg) => write!(f, "Channel send error: {msg}"),
            Self::FileIo(msg) => write!(f, "File I/O error: {msg}"),
            Self::Stats(msg) => write!(f, "Stats error: {msg}"),
            Self::NoSession => write!(f, "No active session"),
            Self::NotConnected => write!(f, "Peer connection is not connected"),
        }
    }
}

impl std::error::Error for SessionError {}

impl SessionError {
    /// Wrap an engine failure as a negotiation error.
    pub fn negotiation(err: &EngineError) -> Self {
        Self::Negotiation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let err = SessionError::Ice("bad candidate".to_string());
        assert_eq!(err.to_string(), "ICE error: bad candidate");
        assert_eq!(SessionError::NoSession.to_string(), "No active session");
    }

    #[test]
    fn test_negotiation_wraps_engine_error() {
        let err = SessionError::negotiation(&EngineError::Rejected("m-line".to_string()));
        assert!(matches!(err, SessionError::Negotiation(ref m) if m.contains("m-line")));
    }
}
