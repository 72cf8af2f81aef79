//! The local projection: what the render layer shows.
//!
//! A projection is never stored and patched. It is recomputed from the
//! latest confirmed snapshots plus any unconfirmed optimistic overlay after
//! every relevant write.

use serde::Serialize;

use chance_master_core::{
    position_string, BoardSnapshot, ClaimKind, ClockBase, CodecError, DiceTriple, GameResult,
    GameStatus, PlayerAddress, SessionId, SessionSnapshot, Side,
};

/// Where the local player sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Seat {
    White,
    Black,
    Spectator,
}

impl Seat {
    pub fn side(self) -> Option<Side> {
        match self {
            Seat::White => Some(Side::White),
            Seat::Black => Some(Side::Black),
            Seat::Spectator => None,
        }
    }
}

impl From<Option<Side>> for Seat {
    fn from(side: Option<Side>) -> Self {
        match side {
            Some(Side::White) => Seat::White,
            Some(Side::Black) => Seat::Black,
            None => Seat::Spectator,
        }
    }
}

/// Board part of an optimistic overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayBoard {
    pub position: String,
    pub turn: Side,
    pub white_in_check: bool,
    pub black_in_check: bool,
}

/// Unconfirmed local state layered over the confirmed snapshots.
///
/// Each part is cleared independently by the confirmed channel that
/// supersedes it: board updates clear `board`, session updates that hand
/// the turn over clear `board` and `dice_cleared`, clock updates clear
/// `clock`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Overlay {
    pub board: Option<OverlayBoard>,
    pub dice_cleared: bool,
    pub clock: Option<ClockBase>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.board.is_none() && !self.dice_cleared && self.clock.is_none()
    }
}

/// Render-ready view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalProjection {
    pub session: SessionId,
    pub white: PlayerAddress,
    pub black: PlayerAddress,
    /// Position string currently shown.
    pub position: String,
    pub turn: Side,
    pub dice: DiceTriple,
    pub status: GameStatus,
    pub result: GameResult,
    pub claim: ClaimKind,
    pub white_draw_offered: bool,
    pub black_draw_offered: bool,
    pub white_in_check: bool,
    pub black_in_check: bool,
    pub clock: ClockBase,
    pub seat: Seat,
    pub me_to_move: bool,
    pub can_roll: bool,
    pub draw_pending: bool,
    /// A proof is in flight.
    pub busy: bool,
    /// Some unconfirmed local state is shown.
    pub optimistic: bool,
}

impl LocalProjection {
    pub fn is_over(&self) -> bool {
        self.status == GameStatus::Ended || self.result.is_decided()
    }

    /// Content fingerprint used to suppress identical re-publications.
    pub fn fingerprint(&self) -> [u8; 32] {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        *blake3::hash(&bytes).as_bytes()
    }
}

/// Everything a projection is computed from.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionInputs<'a> {
    pub session: &'a SessionSnapshot,
    pub board: &'a BoardSnapshot,
    pub overlay: Option<&'a Overlay>,
    pub clock: ClockBase,
    pub me: Option<&'a PlayerAddress>,
    pub busy: bool,
    /// Last successfully rendered position, kept on codec failure.
    pub last_position: Option<&'a str>,
}

/// Compute the projection. A codec failure is returned alongside a
/// projection that keeps the last rendered position.
pub fn compute(inputs: ProjectionInputs<'_>) -> (LocalProjection, Option<CodecError>) {
    let ProjectionInputs {
        session,
        board,
        overlay,
        clock,
        me,
        busy,
        last_position,
    } = inputs;

    let mut codec_error = None;
    let (position, turn, white_in_check, black_in_check) =
        match overlay.and_then(|o| o.board.as_ref()) {
            Some(ob) => (
                ob.position.clone(),
                ob.turn,
                ob.white_in_check,
                ob.black_in_check,
            ),
            None => {
                let position = match position_string(board, session.turn) {
                    Ok(s) => s,
                    Err(e) => {
                        codec_error = Some(e);
                        last_position.unwrap_or_default().to_string()
                    }
                };
                (
                    position,
                    session.turn,
                    board.white_in_check,
                    board.black_in_check,
                )
            }
        };

    let dice = if overlay.map_or(false, |o| o.dice_cleared) {
        DiceTriple::UNROLLED
    } else {
        session.dice
    };

    let seat = Seat::from(me.and_then(|me| session.seat_of(me)));
    let over = session.status == GameStatus::Ended || session.result.is_decided();
    let me_to_move = !over && seat.side() == Some(turn);

    let projection = LocalProjection {
        session: session.id,
        white: session.white,
        black: session.black,
        position,
        turn,
        dice,
        status: session.status,
        result: session.result,
        claim: session.claim,
        white_draw_offered: session.white_draw_offered,
        black_draw_offered: session.black_draw_offered,
        white_in_check,
        black_in_check,
        clock,
        seat,
        me_to_move,
        can_roll: me_to_move && dice.is_unrolled() && !busy,
        draw_pending: session.white_draw_offered || session.black_draw_offered,
        busy,
        optimistic: overlay.map_or(false, |o| !o.is_empty()),
    };
    (projection, codec_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chance_master_core::{parse_position, PieceType, Position, START_POSITION};

    fn session() -> SessionSnapshot {
        SessionSnapshot {
            id: SessionId(9),
            white: PlayerAddress::from_bytes([1; 32]),
            black: PlayerAddress::from_bytes([2; 32]),
            turn: Side::White,
            status: GameStatus::Active,
            result: GameResult::None,
            white_draw_offered: false,
            black_draw_offered: false,
            claim: ClaimKind::None,
            dice: DiceTriple::UNROLLED,
        }
    }

    fn clock() -> ClockBase {
        ClockBase {
            white_ms: 600_000,
            black_ms: 600_000,
            epoch_ms: 1_000,
            side_to_move: Side::White,
        }
    }

    fn inputs<'a>(
        session: &'a SessionSnapshot,
        board: &'a BoardSnapshot,
        me: Option<&'a PlayerAddress>,
    ) -> ProjectionInputs<'a> {
        ProjectionInputs {
            session,
            board,
            overlay: None,
            clock: clock(),
            me,
            busy: false,
            last_position: None,
        }
    }

    #[test]
    fn test_derived_fields_for_white() {
        let s = session();
        let board = Position::start().to_board();
        let (p, err) = compute(inputs(&s, &board, Some(&s.white)));
        assert!(err.is_none());
        assert_eq!(p.position, START_POSITION);
        assert_eq!(p.seat, Seat::White);
        assert!(p.me_to_move);
        assert!(p.can_roll);
        assert!(!p.optimistic);

        let (p, _) = compute(inputs(&s, &board, Some(&s.black)));
        assert_eq!(p.seat, Seat::Black);
        assert!(!p.me_to_move);
        assert!(!p.can_roll);

        let stranger = PlayerAddress::from_bytes([7; 32]);
        let (p, _) = compute(inputs(&s, &board, Some(&stranger)));
        assert_eq!(p.seat, Seat::Spectator);
    }

    #[test]
    fn test_cannot_roll_after_rolling_or_when_over() {
        let mut s = session();
        s.dice = DiceTriple::new([Some(PieceType::Pawn), None, None]);
        let board = Position::start().to_board();
        let (p, _) = compute(inputs(&s, &board, Some(&s.white)));
        assert!(p.me_to_move);
        assert!(!p.can_roll);

        s.dice = DiceTriple::UNROLLED;
        s.result = GameResult::Black;
        let (p, _) = compute(inputs(&s, &board, Some(&s.white)));
        assert!(p.is_over());
        assert!(!p.me_to_move);
        assert!(!p.can_roll);
    }

    #[test]
    fn test_overlay_wins_over_confirmed() {
        let mut s = session();
        s.dice = DiceTriple::new([Some(PieceType::Pawn); 3]);
        let board = Position::start().to_board();
        let post = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
        let overlay = Overlay {
            board: Some(OverlayBoard {
                position: post.to_string(),
                turn: Side::Black,
                white_in_check: false,
                black_in_check: false,
            }),
            dice_cleared: true,
            clock: None,
        };
        let mut i = inputs(&s, &board, Some(&s.white));
        i.overlay = Some(&overlay);
        let (p, _) = compute(i);
        assert_eq!(p.position, post);
        assert_eq!(p.turn, Side::Black);
        assert!(p.dice.is_unrolled());
        assert!(p.optimistic);
        assert!(!p.me_to_move);
        assert!(parse_position(&p.position).is_ok());
    }

    #[test]
    fn test_codec_failure_keeps_last_position() {
        let s = session();
        let mut board = Position::start().to_board();
        board.set_placement(Side::Black, PieceType::Queen, board.placement(Side::Black, PieceType::Queen) | 0x10);
        let mut i = inputs(&s, &board, None);
        i.last_position = Some(START_POSITION);
        let (p, err) = compute(i);
        assert!(matches!(err, Some(CodecError::OverlappingPlacement(_))));
        assert_eq!(p.position, START_POSITION);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let s = session();
        let board = Position::start().to_board();
        let (a, _) = compute(inputs(&s, &board, None));
        let (b, _) = compute(inputs(&s, &board, None));
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut s2 = s.clone();
        s2.white_draw_offered = true;
        let (c, _) = compute(inputs(&s2, &board, None));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
