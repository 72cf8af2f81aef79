//! Standard chess movement rules over a [`Position`].
//!
//! This is the local legality check used to reject moves before a proof is
//! requested. It covers every standard rule that depends only on the
//! position: piece movement, captures, castling (rights, empty path, no
//! castling out of or through check), en passant, promotion, and king
//! safety. Repetition and the fifty-move rule need history the ledger does
//! not expose and are not checked.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::Position;
use crate::snapshot::CastlingRights;
use crate::types::{Piece, PieceType, Side, Square};

const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];

const KING_OFFSETS: [(i8, i8); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

const ROOK_DIRS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

const PROMOTIONS: [PieceType; 4] = [
    PieceType::Queen,
    PieceType::Rook,
    PieceType::Bishop,
    PieceType::Knight,
];

/// A move from one square to another, with an optional promotion piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceType>,
}

impl Move {
    pub const fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    pub const fn with_promotion(mut self, kind: PieceType) -> Self {
        self.promotion = Some(kind);
        self
    }

    /// Compact encoding sent to the proof service, e.g. `e2e4` or `e7e8q`.
    pub fn uci(&self) -> String {
        let mut s = format!("{}{}", self.from, self.to);
        if let Some(kind) = self.promotion {
            s.push(kind.letter());
        }
        s
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uci())
    }
}

const fn pawn_dir(side: Side) -> i8 {
    match side {
        Side::White => 1,
        Side::Black => -1,
    }
}

const fn home_rank(side: Side) -> i8 {
    match side {
        Side::White => 0,
        Side::Black => 7,
    }
}

/// Whether `square` is attacked by any piece of side `by`.
pub fn is_attacked(position: &Position, square: Square, by: Side) -> bool {
    let holds = |sq: Option<Square>, kinds: &[PieceType]| {
        sq.and_then(|sq| position.piece_at(sq))
            .map_or(false, |p| p.side == by && kinds.contains(&p.kind))
    };

    // Pawns attack diagonally forward, so look one rank "behind" the square.
    let back = -pawn_dir(by);
    if holds(square.offset(-1, back), &[PieceType::Pawn])
        || holds(square.offset(1, back), &[PieceType::Pawn])
    {
        return true;
    }

    if KNIGHT_OFFSETS
        .iter()
        .any(|&(df, dr)| holds(square.offset(df, dr), &[PieceType::Knight]))
    {
        return true;
    }

    if KING_OFFSETS
        .iter()
        .any(|&(df, dr)| holds(square.offset(df, dr), &[PieceType::King]))
    {
        return true;
    }

    let ray_hits = |dirs: &[(i8, i8)], kinds: &[PieceType]| {
        dirs.iter().any(|&(df, dr)| {
            let mut cursor = square.offset(df, dr);
            while let Some(sq) = cursor {
                if let Some(p) = position.piece_at(sq) {
                    return p.side == by && kinds.contains(&p.kind);
                }
                cursor = sq.offset(df, dr);
            }
            false
        })
    };

    ray_hits(&ROOK_DIRS, &[PieceType::Rook, PieceType::Queen])
        || ray_hits(&BISHOP_DIRS, &[PieceType::Bishop, PieceType::Queen])
}

/// Whether `side`'s king is attacked. A side without a king is never in check.
pub fn is_in_check(position: &Position, side: Side) -> bool {
    position
        .king_square(side)
        .map_or(false, |king| is_attacked(position, king, side.opponent()))
}

/// Moves for the piece on `from` that obey movement rules but may leave the
/// mover's king in check.
fn pseudo_legal_from(position: &Position, from: Square) -> Vec<Move> {
    let Some(piece) = position.piece_at(from) else {
        return Vec::new();
    };
    let mut moves = Vec::new();
    let side = piece.side;
    let empty = |sq: Square| position.piece_at(sq).is_none();
    let enemy = |sq: Square| position.piece_at(sq).map_or(false, |p| p.side != side);

    match piece.kind {
        PieceType::Pawn => {
            let dir = pawn_dir(side);
            let last_rank = home_rank(side.opponent());
            let mut push = |to: Square| {
                if to.rank() == last_rank {
                    for kind in PROMOTIONS {
                        moves.push(Move::new(from, to).with_promotion(kind));
                    }
                } else {
                    moves.push(Move::new(from, to));
                }
            };

            if let Some(one) = from.offset(0, dir).filter(|sq| empty(*sq)) {
                push(one);
                let start_rank = home_rank(side) + dir;
                if from.rank() == start_rank {
                    if let Some(two) = one.offset(0, dir).filter(|sq| empty(*sq)) {
                        push(two);
                    }
                }
            }

            for df in [-1, 1] {
                if let Some(to) = from.offset(df, dir) {
                    if enemy(to) || position.en_passant == Some(to) {
                        push(to);
                    }
                }
            }
        }
        PieceType::Knight | PieceType::King => {
            let offsets = if piece.kind == PieceType::Knight {
                &KNIGHT_OFFSETS
            } else {
                &KING_OFFSETS
            };
            for &(df, dr) in offsets {
                if let Some(to) = from.offset(df, dr) {
                    if empty(to) || enemy(to) {
                        moves.push(Move::new(from, to));
                    }
                }
            }
            if piece.kind == PieceType::King {
                castling_moves(position, from, side, &mut moves);
            }
        }
        PieceType::Bishop | PieceType::Rook | PieceType::Queen => {
            let dirs: Vec<(i8, i8)> = match piece.kind {
                PieceType::Bishop => BISHOP_DIRS.to_vec(),
                PieceType::Rook => ROOK_DIRS.to_vec(),
                _ => ROOK_DIRS.iter().chain(BISHOP_DIRS.iter()).copied().collect(),
            };
            for (df, dr) in dirs {
                let mut cursor = from.offset(df, dr);
                while let Some(to) = cursor {
                    if empty(to) {
                        moves.push(Move::new(from, to));
                    } else {
                        if enemy(to) {
                            moves.push(Move::new(from, to));
                        }
                        break;
                    }
                    cursor = to.offset(df, dr);
                }
            }
        }
    }

    moves
}

fn castling_moves(position: &Position, from: Square, side: Side, moves: &mut Vec<Move>) {
    let rank = home_rank(side);
    if Square::from_coords(4, rank) != Some(from) {
        return;
    }
    let opponent = side.opponent();
    if is_attacked(position, from, opponent) {
        return;
    }
    let rook = Some(Piece::new(side, PieceType::Rook));
    let sq = |file: i8| Square::from_coords(file, rank);

    // King side: f and g empty and not attacked, rook on h.
    if position.castling.has(CastlingRights::king_side(side)) {
        if let (Some(f), Some(g), Some(h)) = (sq(5), sq(6), sq(7)) {
            if position.piece_at(h) == rook
                && position.piece_at(f).is_none()
                && position.piece_at(g).is_none()
                && !is_attacked(position, f, opponent)
                && !is_attacked(position, g, opponent)
            {
                moves.push(Move::new(from, g));
            }
        }
    }

    // Queen side: b, c and d empty, c and d not attacked, rook on a.
    if position.castling.has(CastlingRights::queen_side(side)) {
        if let (Some(a), Some(b), Some(c), Some(d)) = (sq(0), sq(1), sq(2), sq(3)) {
            if position.piece_at(a) == rook
                && position.piece_at(b).is_none()
                && position.piece_at(c).is_none()
                && position.piece_at(d).is_none()
                && !is_attacked(position, c, opponent)
                && !is_attacked(position, d, opponent)
            {
                moves.push(Move::new(from, c));
            }
        }
    }
}

/// Legal moves for the piece on `from`. Empty if the square is empty or
/// holds a piece of the side not to move.
pub fn legal_moves_from(position: &Position, from: Square) -> Vec<Move> {
    match position.piece_at(from) {
        Some(p) if p.side == position.side_to_move => {}
        _ => return Vec::new(),
    }
    pseudo_legal_from(position, from)
        .into_iter()
        .filter(|mv| {
            let after = apply_unchecked(position, mv);
            !is_in_check(&after, position.side_to_move)
        })
        .collect()
}

/// All legal moves for the side to move.
pub fn legal_moves(position: &Position) -> Vec<Move> {
    position
        .pieces()
        .filter(|(_, p)| p.side == position.side_to_move)
        .flat_map(|(sq, _)| legal_moves_from(position, sq))
        .collect()
}

/// Resolve a from/to pair to a legal move.
///
/// A pawn reaching the last rank promotes to `promotion`, or to a queen
/// when no choice is given. Returns `None` if the move is illegal.
pub fn resolve_move(
    position: &Position,
    from: Square,
    to: Square,
    promotion: Option<PieceType>,
) -> Option<Move> {
    let candidates = legal_moves_from(position, from);
    candidates.into_iter().find(|mv| {
        mv.to == to
            && match mv.promotion {
                None => true,
                Some(kind) => kind == promotion.unwrap_or(PieceType::Queen),
            }
    })
}

/// Apply a move that has been checked with [`resolve_move`] or
/// [`legal_moves_from`], returning the resulting position.
pub fn apply(position: &Position, mv: &Move) -> Position {
    apply_unchecked(position, mv)
}

fn apply_unchecked(position: &Position, mv: &Move) -> Position {
    let mut next = position.clone();
    let Some(piece) = position.piece_at(mv.from) else {
        return next;
    };
    let side = piece.side;

    // 1. En passant capture removes the pawn behind the target square.
    if piece.kind == PieceType::Pawn
        && position.en_passant == Some(mv.to)
        && mv.from.file() != mv.to.file()
        && position.piece_at(mv.to).is_none()
    {
        if let Some(victim) = mv.to.offset(0, -pawn_dir(side)) {
            next.set(victim, None);
        }
    }

    // 2. Castling moves the rook as well.
    if piece.kind == PieceType::King && (mv.to.file() - mv.from.file()).abs() == 2 {
        let rank = mv.from.rank();
        let (rook_from, rook_to) = if mv.to.file() > mv.from.file() {
            (Square::from_coords(7, rank), Square::from_coords(5, rank))
        } else {
            (Square::from_coords(0, rank), Square::from_coords(3, rank))
        };
        if let (Some(rf), Some(rt)) = (rook_from, rook_to) {
            let rook = next.piece_at(rf);
            next.set(rf, None);
            next.set(rt, rook);
        }
    }

    // 3. Move the piece, promoting if it reaches the last rank.
    let landed = match (piece.kind, mv.promotion) {
        (PieceType::Pawn, Some(kind)) => Piece::new(side, kind),
        (PieceType::Pawn, None) if mv.to.rank() == home_rank(side.opponent()) => {
            Piece::new(side, PieceType::Queen)
        }
        _ => piece,
    };
    next.set(mv.from, None);
    next.set(mv.to, Some(landed));

    // 4. Castling rights: king moves lose both, rooks moving or captured on
    //    their home corner lose one.
    if piece.kind == PieceType::King {
        next.castling.remove(CastlingRights::king_side(side));
        next.castling.remove(CastlingRights::queen_side(side));
    }
    for s in [Side::White, Side::Black] {
        let rank = home_rank(s);
        for (file, flag) in [
            (7, CastlingRights::king_side(s)),
            (0, CastlingRights::queen_side(s)),
        ] {
            let corner = Square::from_coords(file, rank);
            if corner == Some(mv.from) || corner == Some(mv.to) {
                next.castling.remove(flag);
            }
        }
    }

    // 5. A double pawn push exposes the square it passed over.
    next.en_passant = if piece.kind == PieceType::Pawn && (mv.to.rank() - mv.from.rank()).abs() == 2
    {
        mv.from.offset(0, pawn_dir(side))
    } else {
        None
    };

    next.side_to_move = side.opponent();
    next
}
