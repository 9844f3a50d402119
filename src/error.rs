//! Error types shared between the game backend and the request router.

use std::net::SocketAddr;

use thiserror::Error;

/// Rule violations surfaced to clients as structured failure responses.
///
/// The display strings double as the wire-level `message` field, so changing
/// them is a protocol change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// The acting player does not hold the turn, or the game is not running.
    #[error("Not your turn")]
    NotYourTurn,
    /// The card index is out of range, already revealed, or already matched.
    #[error("Invalid card selection")]
    InvalidSelection,
    /// The room already holds the maximum number of players.
    #[error("Room is full")]
    RoomFull,
    /// No room exists under the requested code.
    #[error("Room not found")]
    RoomNotFound,
    /// The player is not registered in any room.
    #[error("Not in a game")]
    NotInGame,
    /// The room reached its terminal state and no longer accepts joins.
    #[error("Game already finished")]
    GameFinished,
}

/// Failures encountered while routing a client request to a backend.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The pool holds no registered backends at all.
    #[error("no backends registered")]
    NoBackends,
    /// Every candidate backend was tried and none produced a response.
    #[error("all {attempted} backend(s) failed")]
    Exhausted {
        /// Number of backends attempted before giving up.
        attempted: usize,
    },
    /// A single backend could not be reached within the connect timeout.
    #[error("backend {addr} unreachable")]
    Unreachable {
        /// Address of the backend that refused or timed out.
        addr: SocketAddr,
        /// Underlying connect error, when one was observed.
        #[source]
        source: Option<std::io::Error>,
    },
    /// The backend accepted the connection but never answered the request.
    #[error("backend {addr} did not respond in time")]
    ResponseTimeout {
        /// Address of the silent backend.
        addr: SocketAddr,
    },
    /// The backend closed the connection before sending a response.
    #[error("backend {addr} closed before responding")]
    ClosedEarly {
        /// Address of the backend that hung up.
        addr: SocketAddr,
    },
    /// I/O or framing failure while exchanging lines with a backend.
    #[error("relay error on backend {addr}")]
    Relay {
        /// Address of the backend the relay was talking to.
        addr: SocketAddr,
        /// Underlying framing error.
        #[source]
        source: tokio_util::codec::LinesCodecError,
    },
}
