//! Error types for Chance Master Core.

use thiserror::Error;

use crate::types::{PieceType, Side, Square};

/// Errors parsing identifiers and primitive values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid square: {0}")]
    InvalidSquare(String),

    #[error("invalid player address: {0}")]
    InvalidAddress(String),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

/// Errors from the board codec.
///
/// These indicate an upstream data inconsistency; callers keep the
/// previously rendered position.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("two placement sets claim square {0}")]
    OverlappingPlacement(Square),

    #[error("malformed position string: {0}")]
    Malformed(String),
}

/// Reasons a candidate move is rejected before any proof is requested.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoveRejection {
    #[error("a move is already being committed")]
    Busy,

    #[error("no session attached")]
    NoSession,

    #[error("roll the dice first")]
    DiceNotRolled,

    #[error("no piece on {0}")]
    EmptySquare(Square),

    #[error("it is {to_move}'s turn")]
    NotYourTurn { to_move: Side },

    #[error("you are not seated in this game")]
    NotSeated,

    #[error("{} not allowed by dice", .0.name())]
    PieceNotRolled(PieceType),

    #[error("illegal move {from}{to}")]
    IllegalMove { from: Square, to: Square },

    #[error("the game is over")]
    GameOver,
}
