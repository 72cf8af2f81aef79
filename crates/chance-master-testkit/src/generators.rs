//! Proptest generators for property-based testing.

use proptest::prelude::*;

use chance_master_core::{
    CastlingRights, DiceTriple, Piece, PieceType, PlayerAddress, Position, SessionId, Side,
    Square,
};

/// Generate a side.
pub fn side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::White), Just(Side::Black)]
}

/// Generate a piece type.
pub fn piece_type() -> impl Strategy<Value = PieceType> {
    prop::sample::select(PieceType::ALL.to_vec())
}

/// Generate any square.
pub fn square() -> impl Strategy<Value = Square> {
    (0u8..64).prop_filter_map("square index", Square::new)
}

/// Generate a dice triple, each die independently rolled or not.
pub fn dice() -> impl Strategy<Value = DiceTriple> {
    prop::array::uniform3(prop::option::of(piece_type())).prop_map(DiceTriple::new)
}

/// Generate a fully rolled dice triple.
pub fn rolled_dice() -> impl Strategy<Value = DiceTriple> {
    prop::array::uniform3(piece_type()).prop_map(|d| DiceTriple::new(d.map(Some)))
}

/// Generate a castling mask.
pub fn castling() -> impl Strategy<Value = CastlingRights> {
    (0u8..16).prop_map(CastlingRights)
}

pub fn session_id() -> impl Strategy<Value = SessionId> {
    (1u64..=u32::MAX as u64).prop_map(SessionId)
}

pub fn player_address() -> impl Strategy<Value = PlayerAddress> {
    any::<[u8; 32]>().prop_map(PlayerAddress::from_bytes)
}

/// Parameters for generating a board arrangement.
///
/// Both kings are always present on distinct squares. Other squares hold
/// a piece with low probability; pawns never stand on the first or last
/// rank.
#[derive(Debug, Clone)]
pub struct ArrangementParams {
    pub white_king: Square,
    pub black_king: Square,
    pub others: Vec<Option<Piece>>,
    pub side_to_move: Side,
    pub castling: CastlingRights,
}

fn piece() -> impl Strategy<Value = Piece> {
    (side(), piece_type())
        .prop_filter("one king per side", |(_, kind)| *kind != PieceType::King)
        .prop_map(|(side, kind)| Piece::new(side, kind))
}

impl Arbitrary for ArrangementParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            square(),
            square(),
            prop::collection::vec(prop::option::weighted(0.2, piece()), 64),
            side(),
            castling(),
        )
            .prop_filter("kings on distinct squares", |(wk, bk, ..)| wk != bk)
            .prop_map(
                |(white_king, black_king, others, side_to_move, castling)| ArrangementParams {
                    white_king,
                    black_king,
                    others,
                    side_to_move,
                    castling,
                },
            )
            .boxed()
    }
}

/// Build the position an arrangement describes.
pub fn position_from_params(params: &ArrangementParams) -> Position {
    let mut position = Position::empty();
    position.side_to_move = params.side_to_move;
    position.castling = params.castling;

    for (square, piece) in Square::all().zip(&params.others) {
        let Some(piece) = piece else { continue };
        let back_rank = square.rank() == 0 || square.rank() == 7;
        if piece.kind == PieceType::Pawn && back_rank {
            continue;
        }
        position.set(square, Some(*piece));
    }
    position.set(
        params.white_king,
        Some(Piece::new(Side::White, PieceType::King)),
    );
    position.set(
        params.black_king,
        Some(Piece::new(Side::Black, PieceType::King)),
    );
    position
}

#[cfg(test)]
mod tests {
    use super::*;
    use chance_master_core::{
        is_in_check, legal_moves, parse_position, position_string, rules,
    };

    proptest! {
        #[test]
        fn test_position_string_round_trip(params: ArrangementParams) {
            let position = position_from_params(&params);
            let board = position.to_board();

            let encoded = position_string(&board, position.side_to_move).unwrap();
            let parsed = parse_position(&encoded).unwrap();

            prop_assert_eq!(&parsed, &position);
            prop_assert_eq!(parsed.to_board(), board);
        }

        #[test]
        fn test_legal_moves_never_leave_king_in_check(params: ArrangementParams) {
            let position = position_from_params(&params);
            let mover = position.side_to_move;

            for mv in legal_moves(&position) {
                let next = rules::apply(&position, &mv);
                prop_assert!(!is_in_check(&next, mover), "{} leaves king in check", mv.uci());
                prop_assert_eq!(next.side_to_move, mover.opponent());
            }
        }

        #[test]
        fn test_rolled_dice_are_never_unrolled(dice in rolled_dice()) {
            prop_assert!(!dice.is_unrolled());
            prop_assert!(dice.tags().iter().all(|t| (1..=6).contains(t)));
        }
    }
}
