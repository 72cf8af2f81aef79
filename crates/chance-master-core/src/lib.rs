//! # Chance Master Core
//!
//! Pure primitives for the Chance Master client: identifiers, dice,
//! remote entity snapshots, the board codec, chess movement rules and the
//! clock engine.
//!
//! This crate contains no I/O, no networking and no timers. Everything here
//! is a pure function of its inputs (the clock engine takes "now" as an
//! argument).
//!
//! ## Key Types
//!
//! - [`SessionSnapshot`], [`BoardSnapshot`], [`ClockSnapshot`],
//!   [`ClaimSnapshot`] - the four remote entities of a session
//! - [`DiceTriple`] - the three dice gating which piece types may move
//! - [`Position`] - mailbox board used by the codec and the rules
//! - [`ClockEngine`] - live countdown predicted from a clock base
//!
//! ## Position strings
//!
//! Boards are exchanged with the proof service as six-field position
//! strings. See [`codec`].

pub mod clock;
pub mod codec;
pub mod error;
pub mod rules;
pub mod snapshot;
pub mod types;

pub use clock::{ClockBase, ClockDisplay, ClockEngine, ManualClock, SystemClock, TimeSource};
pub use codec::{parse_position, position_string, Position, START_POSITION};
pub use error::{CodecError, CoreError, MoveRejection};
pub use rules::{is_in_check, legal_moves, legal_moves_from, resolve_move, Move};
pub use snapshot::{
    BoardSnapshot, CastlingRights, ClaimKind, ClaimSnapshot, ClockSnapshot, GameResult, GameStatus,
    PlayerSnapshot, SessionSnapshot,
};
pub use types::{DiceTriple, EntityId, Piece, PieceType, PlayerAddress, SessionId, Side, Square};
