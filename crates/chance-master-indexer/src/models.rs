//! Wire models pushed by the state indexer.
//!
//! The indexer delivers loosely typed JSON objects tagged by `__typename`.
//! Numbers may arrive as JSON numbers, decimal strings or `0x` hex strings;
//! enums may arrive as variant names or as indices. Everything is decoded
//! here into the strong snapshot types of `chance-master-core` before any
//! other component sees it.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{trace, warn};

use chance_master_core::{
    BoardSnapshot, CastlingRights, ClaimKind, ClaimSnapshot, ClockSnapshot, DiceTriple,
    EntityId, GameResult, GameStatus, PieceType, PlayerAddress, PlayerSnapshot, SessionId,
    SessionSnapshot, Side, Square,
};

use crate::error::{IndexerError, Result};

/// En-passant wire value meaning "no square".
pub const NO_EN_PASSANT: u64 = 255;

// ───────────────────────────────────────────────────────────────────────────
// Tagged union
// ───────────────────────────────────────────────────────────────────────────

/// One model as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "__typename")]
pub enum RemoteModel {
    #[serde(rename = "chance_master_Player")]
    Player(WirePlayer),
    #[serde(rename = "chance_master_Game")]
    Session(WireSession),
    #[serde(rename = "chance_master_GameBoard")]
    Board(WireBoard),
    #[serde(rename = "chance_master_GameClock")]
    Clock(WireClock),
    #[serde(rename = "chance_master_GameClaim")]
    Claim(WireClaim),
    /// Models of other worlds or kinds this client does not track.
    #[serde(other)]
    Unknown,
}

/// A decoded model update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelUpdate {
    Player(PlayerSnapshot),
    Session(SessionSnapshot),
    Board {
        session: SessionId,
        board: BoardSnapshot,
    },
    Clock {
        session: SessionId,
        clock: ClockSnapshot,
    },
    Claim {
        session: SessionId,
        claim: ClaimSnapshot,
    },
}

impl ModelUpdate {
    /// The session this update belongs to, if it is a session entity.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            ModelUpdate::Player(_) => None,
            ModelUpdate::Session(s) => Some(s.id),
            ModelUpdate::Board { session, .. }
            | ModelUpdate::Clock { session, .. }
            | ModelUpdate::Claim { session, .. } => Some(*session),
        }
    }
}

impl RemoteModel {
    /// Decode into a strong update. `Ok(None)` for unknown kinds.
    pub fn decode(self) -> Result<Option<ModelUpdate>> {
        Ok(Some(match self {
            RemoteModel::Player(p) => ModelUpdate::Player(p.try_into()?),
            RemoteModel::Session(s) => ModelUpdate::Session(s.try_into()?),
            RemoteModel::Board(b) => ModelUpdate::Board {
                session: SessionId(b.id),
                board: b.try_into()?,
            },
            RemoteModel::Clock(c) => ModelUpdate::Clock {
                session: SessionId(c.id),
                clock: c.into(),
            },
            RemoteModel::Claim(c) => ModelUpdate::Claim {
                session: SessionId(c.id),
                claim: c.try_into()?,
            },
            RemoteModel::Unknown => return Ok(None),
        }))
    }
}

/// Decode a `models` array from an entity update.
///
/// Unknown kinds are skipped; malformed entries are skipped with a warning
/// so one bad model does not drop its siblings.
pub fn decode_models(entity: &EntityId, models: Vec<Value>) -> Vec<ModelUpdate> {
    let mut out = Vec::with_capacity(models.len());
    for raw in models {
        let decoded = serde_json::from_value::<RemoteModel>(raw)
            .map_err(IndexerError::from)
            .and_then(RemoteModel::decode);
        match decoded {
            Ok(Some(update)) => out.push(update),
            Ok(None) => trace!(entity = %entity, "skipping unknown model kind"),
            Err(e) => warn!(entity = %entity, error = %e, "dropping malformed model"),
        }
    }
    out
}

/// A seed query node: the model plus the entity id it lives under.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedNode<T> {
    #[serde(default)]
    pub entity: Option<EntityRef>,
    #[serde(flatten)]
    pub model: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

// ───────────────────────────────────────────────────────────────────────────
// Wire structs
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WirePlayer {
    pub contract_address: String,
    #[serde(default, deserialize_with = "de_bool")]
    pub is_enqueued: bool,
    #[serde(deserialize_with = "de_bool")]
    pub is_in_game: bool,
    #[serde(default, deserialize_with = "de_u64")]
    pub last_game_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireSession {
    #[serde(deserialize_with = "de_u64")]
    pub id: u64,
    pub white: String,
    pub black: String,
    pub status: Discriminant,
    pub result: Discriminant,
    #[serde(deserialize_with = "de_u64")]
    pub turn: u64,
    pub prev_roll: WireRoll,
    #[serde(deserialize_with = "de_bool")]
    pub white_draw_offered: bool,
    #[serde(deserialize_with = "de_bool")]
    pub black_draw_offered: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireRoll {
    #[serde(rename = "_0", deserialize_with = "de_u64")]
    pub d0: u64,
    #[serde(rename = "_1", deserialize_with = "de_u64")]
    pub d1: u64,
    #[serde(rename = "_2", deserialize_with = "de_u64")]
    pub d2: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireBoard {
    #[serde(deserialize_with = "de_u64")]
    pub id: u64,
    #[serde(deserialize_with = "de_u64")]
    pub white_pawns: u64,
    #[serde(deserialize_with = "de_u64")]
    pub white_knights: u64,
    #[serde(deserialize_with = "de_u64")]
    pub white_bishops: u64,
    #[serde(deserialize_with = "de_u64")]
    pub white_rooks: u64,
    #[serde(deserialize_with = "de_u64")]
    pub white_queens: u64,
    #[serde(deserialize_with = "de_u64")]
    pub white_king: u64,
    #[serde(deserialize_with = "de_u64")]
    pub black_pawns: u64,
    #[serde(deserialize_with = "de_u64")]
    pub black_knights: u64,
    #[serde(deserialize_with = "de_u64")]
    pub black_bishops: u64,
    #[serde(deserialize_with = "de_u64")]
    pub black_rooks: u64,
    #[serde(deserialize_with = "de_u64")]
    pub black_queens: u64,
    #[serde(deserialize_with = "de_u64")]
    pub black_king: u64,
    #[serde(deserialize_with = "de_u64")]
    pub castling_rights: u64,
    #[serde(deserialize_with = "de_u64")]
    pub ep_square: u64,
    #[serde(default, deserialize_with = "de_bool")]
    pub is_white_in_check: bool,
    #[serde(default, deserialize_with = "de_bool")]
    pub is_black_in_check: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireClock {
    #[serde(deserialize_with = "de_u64")]
    pub id: u64,
    #[serde(deserialize_with = "de_u64")]
    pub white_rem: u64,
    #[serde(deserialize_with = "de_u64")]
    pub black_rem: u64,
    #[serde(deserialize_with = "de_u64")]
    pub last_updated: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireClaim {
    #[serde(deserialize_with = "de_u64")]
    pub id: u64,
    pub claim: Discriminant,
}

/// An enum value sent either by variant name or by index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Discriminant {
    Index(u64),
    Name(String),
}

impl Discriminant {
    /// Resolve against the variant names in index order.
    fn resolve(&self, names: &[&str]) -> Option<usize> {
        match self {
            Discriminant::Index(i) => (*i < names.len() as u64).then_some(*i as usize),
            Discriminant::Name(name) => match parse_u64(name) {
                Some(i) if (i as usize) < names.len() => Some(i as usize),
                _ => names.iter().position(|n| n.eq_ignore_ascii_case(name)),
            },
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Conversions
// ───────────────────────────────────────────────────────────────────────────

fn address(s: &str) -> Result<PlayerAddress> {
    PlayerAddress::from_hex(s).map_err(|e| IndexerError::Malformed(e.to_string()))
}

impl TryFrom<WirePlayer> for PlayerSnapshot {
    type Error = IndexerError;

    fn try_from(p: WirePlayer) -> Result<Self> {
        Ok(PlayerSnapshot {
            address: address(&p.contract_address)?,
            is_enqueued: p.is_enqueued,
            is_in_game: p.is_in_game,
            last_session: (p.last_game_id != 0).then_some(SessionId(p.last_game_id)),
        })
    }
}

impl TryFrom<WireSession> for SessionSnapshot {
    type Error = IndexerError;

    fn try_from(s: WireSession) -> Result<Self> {
        // Anything that is not recognisably finished is treated as live.
        let status = match &s.status {
            Discriminant::Index(0) => GameStatus::Active,
            Discriminant::Index(_) => GameStatus::Ended,
            Discriminant::Name(n) if ["Ended", "Finished"].iter().any(|e| n.eq_ignore_ascii_case(e)) => {
                GameStatus::Ended
            }
            Discriminant::Name(_) => GameStatus::Active,
        };
        let result = match s.result.resolve(&["None", "White", "Black", "Draw"]) {
            Some(0) => GameResult::None,
            Some(1) => GameResult::White,
            Some(2) => GameResult::Black,
            Some(3) => GameResult::Draw,
            _ => {
                return Err(IndexerError::Malformed(format!(
                    "unknown result {:?}",
                    s.result
                )))
            }
        };
        Ok(SessionSnapshot {
            id: SessionId(s.id),
            white: address(&s.white)?,
            black: address(&s.black)?,
            turn: Side::from_turn_flag(s.turn),
            status,
            result,
            white_draw_offered: s.white_draw_offered,
            black_draw_offered: s.black_draw_offered,
            claim: ClaimKind::None,
            dice: DiceTriple::from_contract([s.prev_roll.d0, s.prev_roll.d1, s.prev_roll.d2]),
        })
    }
}

impl TryFrom<WireBoard> for BoardSnapshot {
    type Error = IndexerError;

    fn try_from(b: WireBoard) -> Result<Self> {
        let en_passant = match b.ep_square {
            NO_EN_PASSANT => None,
            sq => Some(
                u8::try_from(sq)
                    .ok()
                    .and_then(Square::new)
                    .ok_or_else(|| IndexerError::Malformed(format!("bad ep square {sq}")))?,
            ),
        };
        let mut board = BoardSnapshot {
            castling: CastlingRights((b.castling_rights & 0b1111) as u8),
            en_passant,
            white_in_check: b.is_white_in_check,
            black_in_check: b.is_black_in_check,
            ..BoardSnapshot::default()
        };
        let sets = [
            (Side::White, PieceType::Pawn, b.white_pawns),
            (Side::White, PieceType::Knight, b.white_knights),
            (Side::White, PieceType::Bishop, b.white_bishops),
            (Side::White, PieceType::Rook, b.white_rooks),
            (Side::White, PieceType::Queen, b.white_queens),
            (Side::White, PieceType::King, b.white_king),
            (Side::Black, PieceType::Pawn, b.black_pawns),
            (Side::Black, PieceType::Knight, b.black_knights),
            (Side::Black, PieceType::Bishop, b.black_bishops),
            (Side::Black, PieceType::Rook, b.black_rooks),
            (Side::Black, PieceType::Queen, b.black_queens),
            (Side::Black, PieceType::King, b.black_king),
        ];
        for (side, kind, bits) in sets {
            board.set_placement(side, kind, bits);
        }
        Ok(board)
    }
}

impl From<WireClock> for ClockSnapshot {
    fn from(c: WireClock) -> Self {
        ClockSnapshot {
            white_remaining_secs: c.white_rem,
            black_remaining_secs: c.black_rem,
            last_updated_secs: c.last_updated,
        }
    }
}

impl TryFrom<WireClaim> for ClaimSnapshot {
    type Error = IndexerError;

    fn try_from(c: WireClaim) -> Result<Self> {
        let claim = match c.claim.resolve(&["None", "Checkmate", "Stalemate"]) {
            Some(0) => ClaimKind::None,
            Some(1) => ClaimKind::Checkmate,
            Some(2) => ClaimKind::Stalemate,
            _ => return Err(IndexerError::Malformed(format!("unknown claim {:?}", c.claim))),
        };
        Ok(ClaimSnapshot { claim })
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Lenient scalars
// ───────────────────────────────────────────────────────────────────────────

fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() => u64::from_str_radix(hex, 16).ok(),
        Some(_) => None,
        None => s.parse().ok(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Num(u64),
    Str(String),
}

fn de_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    use serde::de::Error;
    match Scalar::deserialize(d)? {
        Scalar::Num(n) => Ok(n),
        Scalar::Bool(b) => Ok(b as u64),
        Scalar::Str(s) => parse_u64(&s).ok_or_else(|| D::Error::custom(format!("not a number: {s}"))),
    }
}

fn de_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    use serde::de::Error;
    match Scalar::deserialize(d)? {
        Scalar::Bool(b) => Ok(b),
        Scalar::Num(n) => Ok(n != 0),
        Scalar::Str(s) => match s.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => parse_u64(other)
                .map(|n| n != 0)
                .ok_or_else(|| D::Error::custom(format!("not a boolean: {s}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_json() -> Value {
        json!({
            "__typename": "chance_master_Game",
            "id": "0x7",
            "white": "0x1",
            "black": "0x2",
            "status": "Active",
            "result": "None",
            "turn": 1,
            "prev_roll": { "_0": 0, "_1": "4", "_2": 6 },
            "white_draw_offered": false,
            "black_draw_offered": true
        })
    }

    #[test]
    fn test_decode_session() {
        let model: RemoteModel = serde_json::from_value(session_json()).unwrap();
        let Some(ModelUpdate::Session(s)) = model.decode().unwrap() else {
            panic!("expected session");
        };
        assert_eq!(s.id, SessionId(7));
        assert_eq!(s.turn, Side::Black);
        assert_eq!(s.status, GameStatus::Active);
        assert_eq!(s.white, PlayerAddress::from_hex("0x1").unwrap());
        assert!(s.black_draw_offered);
        assert_eq!(
            s.dice,
            DiceTriple::new([Some(PieceType::Pawn), Some(PieceType::Queen), None])
        );
    }

    #[test]
    fn test_decode_board_ep_sentinel() {
        let mut raw = json!({
            "__typename": "chance_master_GameBoard",
            "id": 7,
            "white_pawns": "0xff00", "white_knights": 66, "white_bishops": 36,
            "white_rooks": 129, "white_queens": 8, "white_king": 16,
            "black_pawns": "71776119061217280", "black_knights": "0x4200000000000000",
            "black_bishops": "0x2400000000000000", "black_rooks": "0x8100000000000000",
            "black_queens": "0x0800000000000000", "black_king": "0x1000000000000000",
            "castling_rights": 15,
            "ep_square": 255,
            "is_white_in_check": false,
            "is_black_in_check": false
        });
        let update = serde_json::from_value::<RemoteModel>(raw.clone())
            .unwrap()
            .decode()
            .unwrap();
        let Some(ModelUpdate::Board { session, board }) = update else {
            panic!("expected board");
        };
        assert_eq!(session, SessionId(7));
        assert_eq!(board.en_passant, None);
        assert_eq!(board.castling, CastlingRights::ALL);
        assert_eq!(board.placement(Side::Black, PieceType::Pawn), 0x00FF_0000_0000_0000);

        raw["ep_square"] = json!(20);
        let Some(ModelUpdate::Board { board, .. }) = serde_json::from_value::<RemoteModel>(raw)
            .unwrap()
            .decode()
            .unwrap()
        else {
            panic!("expected board");
        };
        assert_eq!(board.en_passant, Square::from_notation("e3"));
    }

    #[test]
    fn test_claim_by_name_or_index() {
        for (raw, expected) in [
            (json!("Checkmate"), ClaimKind::Checkmate),
            (json!(2), ClaimKind::Stalemate),
            (json!("None"), ClaimKind::None),
        ] {
            let model = json!({ "__typename": "chance_master_GameClaim", "id": 3, "claim": raw });
            let Some(ModelUpdate::Claim { claim, .. }) = serde_json::from_value::<RemoteModel>(model)
                .unwrap()
                .decode()
                .unwrap()
            else {
                panic!("expected claim");
            };
            assert_eq!(claim.claim, expected);
        }
    }

    #[test]
    fn test_decode_models_skips_unknown_and_malformed() {
        let entity = EntityId::new("0xabc");
        let models = vec![
            json!({ "__typename": "other_World" }),
            json!({ "__typename": "chance_master_GameClaim", "id": 3, "claim": "Bogus" }),
            json!({ "__typename": "chance_master_GameClock", "id": 3, "white_rem": 60, "black_rem": "0x3c", "last_updated": 100 }),
        ];
        let updates = decode_models(&entity, models);
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0],
            ModelUpdate::Clock {
                session: SessionId(3),
                clock: ClockSnapshot {
                    white_remaining_secs: 60,
                    black_remaining_secs: 60,
                    last_updated_secs: 100,
                },
            }
        );
    }

    #[test]
    fn test_player_without_game() {
        let model = json!({
            "__typename": "chance_master_Player",
            "contract_address": "0x0abc",
            "is_enqueued": true,
            "is_in_game": false,
            "last_game_id": "0x0"
        });
        let Some(ModelUpdate::Player(p)) = serde_json::from_value::<RemoteModel>(model)
            .unwrap()
            .decode()
            .unwrap()
        else {
            panic!("expected player");
        };
        assert!(p.is_enqueued);
        assert_eq!(p.last_session, None);
    }

    #[test]
    fn test_seed_node_carries_entity_id() {
        let mut node = session_json();
        node["entity"] = json!({ "id": "0xdead" });
        let seeded: SeedNode<WireSession> = serde_json::from_value(node).unwrap();
        assert_eq!(seeded.entity.map(|e| e.id), Some("0xdead".to_string()));
        assert_eq!(seeded.model.id, 7);
    }
}
