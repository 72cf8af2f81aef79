//! Board codec: placement sets to position strings and back.
//!
//! The position string is the six-field form understood by chess legality
//! checkers and by the proof service:
//!
//! ```text
//! rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1
//! ```
//!
//! - Ranks are written from the eighth down to the first, files a to h.
//! - Runs of empty squares are counted, not enumerated.
//! - Castling flags appear in the fixed order `KQkq`, or `-` if none.
//! - The en-passant field is the target square or `-`.
//! - The halfmove and fullmove counters are not tracked remotely and are
//!   always emitted as `0 1`.
//!
//! Encoding is pure and total except for one failure: two placement sets
//! claiming the same square. That is an upstream inconsistency and is
//! reported as [`CodecError::OverlappingPlacement`], never a panic.

use crate::error::CodecError;
use crate::rules;
use crate::snapshot::{BoardSnapshot, CastlingRights};
use crate::types::{Piece, PieceType, Side, Square};

/// Fixed halfmove/fullmove suffix.
pub const COUNTERS: &str = "0 1";

/// Position string of the standard starting position.
pub const START_POSITION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Castling flags in emission order.
const CASTLING_ORDER: [(u8, char); 4] = [
    (CastlingRights::WHITE_KING, 'K'),
    (CastlingRights::WHITE_QUEEN, 'Q'),
    (CastlingRights::BLACK_KING, 'k'),
    (CastlingRights::BLACK_QUEEN, 'q'),
];

/// Encode a board snapshot and the side to move as a position string.
pub fn position_string(board: &BoardSnapshot, side_to_move: Side) -> Result<String, CodecError> {
    Ok(Position::from_board(board, side_to_move)?.to_position_string())
}

/// Parse a position string. Counters, if present, are ignored.
pub fn parse_position(s: &str) -> Result<Position, CodecError> {
    Position::parse(s)
}

impl BoardSnapshot {
    /// Placement sets, castling and en passant of a position, with check
    /// flags derived from it.
    pub fn from_position(position: &Position) -> Self {
        position.to_board()
    }
}

/// A mailbox view of a board: one optional piece per square.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    squares: [Option<Piece>; 64],
    pub side_to_move: Side,
    pub castling: CastlingRights,
    pub en_passant: Option<Square>,
}

impl Position {
    /// An empty board with white to move and no rights.
    pub fn empty() -> Self {
        Self {
            squares: [None; 64],
            side_to_move: Side::White,
            castling: CastlingRights::NONE,
            en_passant: None,
        }
    }

    /// The standard starting position.
    pub fn start() -> Self {
        // START_POSITION is a constant known to parse.
        Self::parse(START_POSITION).unwrap_or_else(|_| Self::empty())
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.squares[square.index() as usize]
    }

    pub fn set(&mut self, square: Square, piece: Option<Piece>) {
        self.squares[square.index() as usize] = piece;
    }

    /// Iterate occupied squares.
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        Square::all().filter_map(move |sq| self.piece_at(sq).map(|p| (sq, p)))
    }

    /// Find the king of a side.
    pub fn king_square(&self, side: Side) -> Option<Square> {
        self.pieces()
            .find(|(_, p)| p.side == side && p.kind == PieceType::King)
            .map(|(sq, _)| sq)
    }

    /// Build a position from placement sets.
    ///
    /// Fails if any square is claimed by more than one set.
    pub fn from_board(board: &BoardSnapshot, side_to_move: Side) -> Result<Self, CodecError> {
        let mut position = Self {
            squares: [None; 64],
            side_to_move,
            castling: CastlingRights(board.castling.0 & 0b1111),
            en_passant: board.en_passant,
        };

        for side in [Side::White, Side::Black] {
            for kind in PieceType::ALL {
                let bits = board.placement(side, kind);
                for square in Square::all().filter(|sq| bits & sq.bit() != 0) {
                    if position.piece_at(square).is_some() {
                        return Err(CodecError::OverlappingPlacement(square));
                    }
                    position.set(square, Some(Piece::new(side, kind)));
                }
            }
        }

        Ok(position)
    }

    /// Split back into placement sets. Check flags are derived from the
    /// position.
    pub fn to_board(&self) -> BoardSnapshot {
        let mut board = BoardSnapshot {
            castling: self.castling,
            en_passant: self.en_passant,
            white_in_check: rules::is_in_check(self, Side::White),
            black_in_check: rules::is_in_check(self, Side::Black),
            ..BoardSnapshot::default()
        };
        for (square, piece) in self.pieces() {
            let bits = board.placement(piece.side, piece.kind) | square.bit();
            board.set_placement(piece.side, piece.kind, bits);
        }
        board
    }

    /// Encode as a position string.
    pub fn to_position_string(&self) -> String {
        let mut out = String::with_capacity(90);

        for rank in (0..8i8).rev() {
            let mut empty = 0u8;
            for file in 0..8i8 {
                let piece = Square::from_coords(file, rank).and_then(|sq| self.piece_at(sq));
                match piece {
                    Some(p) => {
                        if empty > 0 {
                            out.push((b'0' + empty) as char);
                            empty = 0;
                        }
                        out.push(p.letter());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                out.push((b'0' + empty) as char);
            }
            if rank > 0 {
                out.push('/');
            }
        }

        out.push(' ');
        out.push(self.side_to_move.letter());

        out.push(' ');
        let before = out.len();
        for (flag, letter) in CASTLING_ORDER {
            if self.castling.has(flag) {
                out.push(letter);
            }
        }
        if out.len() == before {
            out.push('-');
        }

        out.push(' ');
        match self.en_passant {
            Some(sq) => out.push_str(&sq.to_notation()),
            None => out.push('-'),
        }

        out.push(' ');
        out.push_str(COUNTERS);
        out
    }

    /// Parse a position string (four or six fields).
    pub fn parse(s: &str) -> Result<Self, CodecError> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 4 && fields.len() != 6 {
            return Err(CodecError::Malformed(format!(
                "expected 4 or 6 fields, got {}",
                fields.len()
            )));
        }

        let mut position = Self::empty();

        // 1. Placement
        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(CodecError::Malformed(format!(
                "expected 8 ranks, got {}",
                ranks.len()
            )));
        }
        for (i, row) in ranks.iter().enumerate() {
            let rank = 7 - i as i8;
            let mut file = 0i8;
            for c in row.chars() {
                if let Some(run) = c.to_digit(10) {
                    if !(1..=8).contains(&run) {
                        return Err(CodecError::Malformed(format!("bad empty run '{c}'")));
                    }
                    file += run as i8;
                } else {
                    let piece = Piece::from_letter(c)
                        .ok_or_else(|| CodecError::Malformed(format!("bad piece letter '{c}'")))?;
                    let square = Square::from_coords(file, rank).ok_or_else(|| {
                        CodecError::Malformed(format!("rank {} overflows", rank + 1))
                    })?;
                    position.set(square, Some(piece));
                    file += 1;
                }
                if file > 8 {
                    return Err(CodecError::Malformed(format!("rank {} overflows", rank + 1)));
                }
            }
            if file != 8 {
                return Err(CodecError::Malformed(format!(
                    "rank {} has {} files",
                    rank + 1,
                    file
                )));
            }
        }

        // 2. Side to move
        position.side_to_move = match fields[1] {
            "w" => Side::White,
            "b" => Side::Black,
            other => return Err(CodecError::Malformed(format!("bad side '{other}'"))),
        };

        // 3. Castling
        if fields[2] != "-" {
            for c in fields[2].chars() {
                let flag = CASTLING_ORDER
                    .iter()
                    .find(|(_, letter)| *letter == c)
                    .map(|(flag, _)| *flag)
                    .ok_or_else(|| CodecError::Malformed(format!("bad castling flag '{c}'")))?;
                position.castling.0 |= flag;
            }
        }

        // 4. En passant
        position.en_passant = match fields[3] {
            "-" => None,
            sq => Some(
                Square::from_notation(sq)
                    .ok_or_else(|| CodecError::Malformed(format!("bad en-passant '{sq}'")))?,
            ),
        };

        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_board() -> BoardSnapshot {
        let mut board = BoardSnapshot {
            castling: CastlingRights::ALL,
            ..BoardSnapshot::default()
        };
        board.set_placement(Side::White, PieceType::Pawn, 0x0000_0000_0000_FF00);
        board.set_placement(Side::White, PieceType::Knight, 0x42);
        board.set_placement(Side::White, PieceType::Bishop, 0x24);
        board.set_placement(Side::White, PieceType::Rook, 0x81);
        board.set_placement(Side::White, PieceType::Queen, 0x08);
        board.set_placement(Side::White, PieceType::King, 0x10);
        board.set_placement(Side::Black, PieceType::Pawn, 0x00FF_0000_0000_0000);
        board.set_placement(Side::Black, PieceType::Knight, 0x4200_0000_0000_0000);
        board.set_placement(Side::Black, PieceType::Bishop, 0x2400_0000_0000_0000);
        board.set_placement(Side::Black, PieceType::Rook, 0x8100_0000_0000_0000);
        board.set_placement(Side::Black, PieceType::Queen, 0x0800_0000_0000_0000);
        board.set_placement(Side::Black, PieceType::King, 0x1000_0000_0000_0000);
        board
    }

    #[test]
    fn test_start_position_string() {
        let s = position_string(&start_board(), Side::White).unwrap();
        assert_eq!(s, START_POSITION);
    }

    #[test]
    fn test_side_castling_and_en_passant_fields() {
        let mut board = start_board();
        board.castling = CastlingRights(CastlingRights::WHITE_QUEEN | CastlingRights::BLACK_KING);
        board.en_passant = Square::from_notation("e3");
        let s = position_string(&board, Side::Black).unwrap();
        assert!(s.ends_with(" b Qk e3 0 1"), "{s}");

        board.castling = CastlingRights::NONE;
        board.en_passant = None;
        let s = position_string(&board, Side::White).unwrap();
        assert!(s.ends_with(" w - - 0 1"), "{s}");
    }

    #[test]
    fn test_overlap_is_an_error() {
        let mut board = start_board();
        // Black queen also claims e1, where the white king stands.
        board.set_placement(Side::Black, PieceType::Queen, 0x0800_0000_0000_0010);
        let err = position_string(&board, Side::White).unwrap_err();
        assert_eq!(
            err,
            CodecError::OverlappingPlacement(Square::from_notation("e1").unwrap())
        );
    }

    #[test]
    fn test_parse_inverts_encode() {
        let board = start_board();
        let s = position_string(&board, Side::White).unwrap();
        let parsed = parse_position(&s).unwrap();
        assert_eq!(BoardSnapshot::from_position(&parsed).placements, board.placements);
        assert_eq!(parsed.castling, board.castling);
        assert_eq!(parsed.to_position_string(), s);
    }

    #[test]
    fn test_parse_accepts_four_fields() {
        let p = parse_position("8/8/8/8/8/8/8/K6k w - -").unwrap();
        assert_eq!(p.king_square(Side::White), Square::from_notation("a1"));
        assert_eq!(p.king_square(Side::Black), Square::from_notation("h1"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_position("").is_err());
        assert!(parse_position("8/8/8/8/8/8/8 w - - 0 1").is_err());
        assert!(parse_position("9/8/8/8/8/8/8/8 w - - 0 1").is_err());
        assert!(parse_position("7/8/8/8/8/8/8/8 w - - 0 1").is_err());
        assert!(parse_position("8/8/8/8/8/8/8/8 x - - 0 1").is_err());
        assert!(parse_position("8/8/8/8/8/8/8/8 w X - 0 1").is_err());
        assert!(parse_position("8/8/8/8/8/8/8/8 w - z9 0 1").is_err());
        assert!(parse_position("8/8/8/8/8/8/8/7x w - - 0 1").is_err());
    }

    #[test]
    fn test_encoding_is_idempotent() {
        let board = start_board();
        let a = position_string(&board, Side::Black).unwrap();
        let b = position_string(&board, Side::Black).unwrap();
        assert_eq!(a, b);
    }
}
