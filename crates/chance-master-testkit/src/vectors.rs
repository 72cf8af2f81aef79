//! Golden position vectors.
//!
//! Each vector pairs raw placement sets, as the indexer delivers them, with
//! the position string the proof service must receive. A codec that
//! disagrees with any of these will produce proofs for the wrong board.

use serde::Serialize;

use chance_master_core::{
    parse_position, position_string, BoardSnapshot, CastlingRights, Side, Square,
};

/// A golden position vector.
#[derive(Debug, Clone, Serialize)]
pub struct PositionVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Placement sets, `[white, black]` each ordered pawn..king.
    pub placements: [[u64; 6]; 2],
    /// Castling mask (wk = 8, wq = 4, bk = 2, bq = 1).
    pub castling: u8,
    /// En-passant target square index, if any.
    pub en_passant: Option<u8>,
    pub side_to_move: Side,
    /// Expected position string.
    pub expected: &'static str,
    /// Expected check flags, `(white, black)`.
    pub in_check: (bool, bool),
}

impl PositionVector {
    /// The board snapshot this vector describes.
    pub fn board(&self) -> BoardSnapshot {
        BoardSnapshot {
            placements: self.placements,
            castling: CastlingRights(self.castling),
            en_passant: self.en_passant.and_then(Square::new),
            white_in_check: self.in_check.0,
            black_in_check: self.in_check.1,
        }
    }
}

const START_WHITE: [u64; 6] = [0xFF00, 0x42, 0x24, 0x81, 0x08, 0x10];
const START_BLACK: [u64; 6] = [
    0x00FF_0000_0000_0000,
    0x4200_0000_0000_0000,
    0x2400_0000_0000_0000,
    0x8100_0000_0000_0000,
    0x0800_0000_0000_0000,
    0x1000_0000_0000_0000,
];

/// Get all golden position vectors.
pub fn all_vectors() -> Vec<PositionVector> {
    vec![
        PositionVector {
            name: "starting position",
            placements: [START_WHITE, START_BLACK],
            castling: 0b1111,
            en_passant: None,
            side_to_move: Side::White,
            expected: "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            in_check: (false, false),
        },
        PositionVector {
            name: "after double pawn push",
            placements: [
                [0x1000_EF00, 0x42, 0x24, 0x81, 0x08, 0x10],
                START_BLACK,
            ],
            castling: 0b1111,
            en_passant: Some(20),
            side_to_move: Side::Black,
            expected: "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
            in_check: (false, false),
        },
        PositionVector {
            name: "partial castling rights",
            placements: [START_WHITE, START_BLACK],
            castling: CastlingRights::WHITE_KING | CastlingRights::BLACK_QUEEN,
            en_passant: None,
            side_to_move: Side::White,
            expected: "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w Kq - 0 1",
            in_check: (false, false),
        },
        PositionVector {
            name: "bare kings",
            placements: [
                [0, 0, 0, 0, 0, 0x10],
                [0, 0, 0, 0, 0, 0x1000_0000_0000_0000],
            ],
            castling: 0,
            en_passant: None,
            side_to_move: Side::White,
            expected: "4k3/8/8/8/8/8/8/4K3 w - - 0 1",
            in_check: (false, false),
        },
        PositionVector {
            name: "pawn one step from promotion",
            placements: [
                [0x0001_0000_0000_0000, 0, 0, 0, 0, 0x10],
                [0, 0, 0, 0, 0, 0x8000_0000_0000_0000],
            ],
            castling: 0,
            en_passant: None,
            side_to_move: Side::White,
            expected: "7k/P7/8/8/8/8/8/4K3 w - - 0 1",
            in_check: (false, false),
        },
        PositionVector {
            name: "black king in check",
            placements: [
                [0, 0, 0, 0, 0x1000, 0x01],
                [0, 0, 0, 0, 0, 0x1000_0000_0000_0000],
            ],
            castling: 0,
            en_passant: None,
            side_to_move: Side::Black,
            expected: "4k3/8/8/8/8/8/4Q3/K7 b - - 0 1",
            in_check: (false, true),
        },
    ]
}

/// Check one vector in both directions.
///
/// Returns a description of the first mismatch.
pub fn verify_vector(vector: &PositionVector) -> Result<(), String> {
    let board = vector.board();
    let encoded = position_string(&board, vector.side_to_move).map_err(|e| e.to_string())?;
    if encoded != vector.expected {
        return Err(format!("encoded {encoded:?}, expected {:?}", vector.expected));
    }

    let parsed = parse_position(vector.expected).map_err(|e| e.to_string())?;
    if parsed.side_to_move != vector.side_to_move {
        return Err(format!("parsed side to move {}", parsed.side_to_move));
    }
    let reboard = parsed.to_board();
    if reboard.placements != board.placements {
        return Err("parsed placements differ".to_string());
    }
    if reboard.castling != board.castling || reboard.en_passant != board.en_passant {
        return Err("parsed castling or en passant differ".to_string());
    }
    if (reboard.white_in_check, reboard.black_in_check) != vector.in_check {
        return Err(format!(
            "derived check flags {:?}",
            (reboard.white_in_check, reboard.black_in_check)
        ));
    }
    Ok(())
}

/// Verify every vector, reporting `(name, result)`.
pub fn verify_all_vectors() -> Vec<(String, Result<(), String>)> {
    all_vectors()
        .iter()
        .map(|v| (v.name.to_string(), verify_vector(v)))
        .collect()
}

/// All vectors as pretty JSON, for other implementations to check against.
pub fn vectors_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&all_vectors())
}
