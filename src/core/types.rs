use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for push channel operations.
pub type PushResult<T> = Result<T, PushError>;

/// Canonical push channel error surface.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Actor error: {0}")]
    ActorError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Push channel is not connected")]
    NotConnected,
}

/// Connection lifecycle as observed from outside the connection actor.
///
/// `Idle` is both the initial state and the state after an explicit disconnect.
/// `Closed` carries the number of consecutive reconnect attempts made so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed { attempt: u32 },
}

impl ConnectionState {
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// Why a live connection (or a connection attempt) ended.
#[derive(Debug, Clone)]
pub enum DisconnectCause {
    RemoteClosed { reason: String },
    ReadFailure { error: String },
    WriteFailure { error: String },
    HandshakeFailed { message: String },
}

impl std::fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectCause::RemoteClosed { reason } => write!(f, "remote closed ({reason})"),
            DisconnectCause::ReadFailure { error } => write!(f, "read error: {error}"),
            DisconnectCause::WriteFailure { error } => write!(f, "write error: {error}"),
            DisconnectCause::HandshakeFailed { message } => {
                write!(f, "handshake failed: {message}")
            }
        }
    }
}

/// Reconnect policy consulted by the connection actor after every unexpected close.
///
/// The strategy owns the attempt counter: `next_delay` is only called when `should_retry`
/// returned true and advances the counter; `reset` is called after a successful open.
pub trait ReconnectStrategy: Send + Sync + 'static {
    fn next_delay(&mut self) -> Duration;
    fn reset(&mut self);
    fn should_retry(&self) -> bool;
    fn attempts(&self) -> u32;
}
