use std::collections::TryReserveError;

use crate::client_manager::ClientId;

/// A deferred queue could not grow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue allocation failed: {0}")]
    Alloc(#[from] TryReserveError),

    #[error("queue capacity overflow")]
    CapacityOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("client {0} is already registered")]
    AlreadyRegistered(ClientId),

    #[error("server full ({0} clients)")]
    Full(usize),

    #[error("client ids exhausted")]
    IdsExhausted,

    #[error("registry allocation failed: {0}")]
    Alloc(#[from] TryReserveError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("already in lobby")]
    AlreadyJoined,

    #[error("lobby full")]
    Full,
}

/// Reasons a well-formed `MOVE` is refused. None of them change the board.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("game has not started")]
    NotStarted,

    #[error("game is over")]
    GameOver,

    #[error("player not in lobby")]
    NotMember,

    #[error("not player's turn")]
    NotYourTurn,

    #[error("invalid coordinate {0:?}")]
    InvalidCoordinate(String),

    #[error("move is out of bounds")]
    OutOfBounds { row: usize, col: usize },

    #[error("space is occupied")]
    Occupied,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("too many recipients: {0} (max {max})", max = shared::MSG_MAX_RECIPIENTS)]
    TooManyRecipients(usize),

    #[error("payload too large: {0} bytes (max {max})", max = shared::MSG_MAX_SIZE)]
    TooLarge(usize),
}

/// Failures surfaced by the dispatcher while serving one command.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Message(#[from] MessageError),
}
