//! Snapshots of the four remote entities that make up a session, plus the
//! player record used to route into one.
//!
//! Snapshots are replaced wholesale on every remote update; nothing here
//! merges partial fields.

use serde::{Deserialize, Serialize};

use crate::types::{DiceTriple, PieceType, PlayerAddress, SessionId, Side, Square};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    Active,
    Ended,
}

/// Result of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameResult {
    #[default]
    None,
    White,
    Black,
    Draw,
}

impl GameResult {
    pub fn is_decided(self) -> bool {
        self != GameResult::None
    }
}

/// Kind of end-of-game claim asserted by a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClaimKind {
    #[default]
    None,
    Checkmate,
    Stalemate,
}

impl ClaimKind {
    /// Ledger discriminant (None = 0, Checkmate = 1, Stalemate = 2).
    pub const fn discriminant(self) -> u8 {
        match self {
            ClaimKind::None => 0,
            ClaimKind::Checkmate => 1,
            ClaimKind::Stalemate => 2,
        }
    }
}

/// The session entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub white: PlayerAddress,
    pub black: PlayerAddress,
    pub turn: Side,
    pub status: GameStatus,
    pub result: GameResult,
    pub white_draw_offered: bool,
    pub black_draw_offered: bool,
    /// Mirrored from [`ClaimSnapshot`] by the synchronizer.
    pub claim: ClaimKind,
    pub dice: DiceTriple,
}

impl SessionSnapshot {
    /// Which side (if any) the given address plays.
    pub fn seat_of(&self, address: &PlayerAddress) -> Option<Side> {
        if *address == self.white {
            Some(Side::White)
        } else if *address == self.black {
            Some(Side::Black)
        } else {
            None
        }
    }

    pub fn draw_offered(&self, side: Side) -> bool {
        match side {
            Side::White => self.white_draw_offered,
            Side::Black => self.black_draw_offered,
        }
    }
}

/// Castling rights as a 4-bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CastlingRights(pub u8);

impl CastlingRights {
    pub const WHITE_KING: u8 = 8;
    pub const WHITE_QUEEN: u8 = 4;
    pub const BLACK_KING: u8 = 2;
    pub const BLACK_QUEEN: u8 = 1;
    pub const ALL: Self = Self(0b1111);
    pub const NONE: Self = Self(0);

    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn remove(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    pub fn king_side(side: Side) -> u8 {
        match side {
            Side::White => Self::WHITE_KING,
            Side::Black => Self::BLACK_KING,
        }
    }

    pub fn queen_side(side: Side) -> u8 {
        match side {
            Side::White => Self::WHITE_QUEEN,
            Side::Black => Self::BLACK_QUEEN,
        }
    }
}

/// The board entity: one placement set per (side, piece type).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// Indexed by `[side.index()][piece_type.tag() - 1]`.
    pub placements: [[u64; 6]; 2],
    pub castling: CastlingRights,
    pub en_passant: Option<Square>,
    pub white_in_check: bool,
    pub black_in_check: bool,
}

impl BoardSnapshot {
    pub fn placement(&self, side: Side, kind: PieceType) -> u64 {
        self.placements[side.index()][kind.tag() as usize - 1]
    }

    pub fn set_placement(&mut self, side: Side, kind: PieceType, bits: u64) {
        self.placements[side.index()][kind.tag() as usize - 1] = bits;
    }

    pub fn in_check(&self, side: Side) -> bool {
        match side {
            Side::White => self.white_in_check,
            Side::Black => self.black_in_check,
        }
    }
}

/// The clock entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub white_remaining_secs: u64,
    pub black_remaining_secs: u64,
    /// Epoch seconds at which the remaining values were taken; 0 = never.
    pub last_updated_secs: u64,
}

/// The claim entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClaimSnapshot {
    pub claim: ClaimKind,
}

/// A player's matchmaking record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub address: PlayerAddress,
    pub is_enqueued: bool,
    pub is_in_game: bool,
    pub last_session: Option<SessionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_castling_flags() {
        let mut rights = CastlingRights::ALL;
        assert!(rights.has(CastlingRights::WHITE_KING));
        rights.remove(CastlingRights::king_side(Side::White));
        assert!(!rights.has(CastlingRights::WHITE_KING));
        assert!(rights.has(CastlingRights::queen_side(Side::White)));
        assert_eq!(rights.0, 0b0111);
    }

    #[test]
    fn test_seat_of() {
        let white = PlayerAddress::from_bytes([1; 32]);
        let black = PlayerAddress::from_bytes([2; 32]);
        let session = SessionSnapshot {
            id: SessionId(7),
            white,
            black,
            turn: Side::White,
            status: GameStatus::Active,
            result: GameResult::None,
            white_draw_offered: false,
            black_draw_offered: true,
            claim: ClaimKind::None,
            dice: DiceTriple::UNROLLED,
        };
        assert_eq!(session.seat_of(&white), Some(Side::White));
        assert_eq!(session.seat_of(&black), Some(Side::Black));
        assert_eq!(session.seat_of(&PlayerAddress::from_bytes([3; 32])), None);
        assert!(session.draw_offered(Side::Black));
    }
}
