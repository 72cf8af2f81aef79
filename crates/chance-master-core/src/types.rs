//! Strong type definitions for Chance Master.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// One of the two sides of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// The other side.
    pub const fn opponent(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    /// Decode the remote turn flag (0 = white, anything else = black).
    pub const fn from_turn_flag(flag: u64) -> Self {
        if flag == 0 {
            Side::White
        } else {
            Side::Black
        }
    }

    /// Encode as the remote turn flag.
    pub const fn turn_flag(self) -> u64 {
        match self {
            Side::White => 0,
            Side::Black => 1,
        }
    }

    /// Side letter used in position strings.
    pub const fn letter(self) -> char {
        match self {
            Side::White => 'w',
            Side::Black => 'b',
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Side::White => 0,
            Side::Black => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => write!(f, "White"),
            Side::Black => write!(f, "Black"),
        }
    }
}

/// Piece type, also the value a die can show.
///
/// Tags follow the proof circuit: 1 pawn, 2 knight, 3 bishop, 4 rook,
/// 5 queen, 6 king.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PieceType {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceType {
    pub const ALL: [PieceType; 6] = [
        PieceType::Pawn,
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::Queen,
        PieceType::King,
    ];

    /// Circuit tag (1..=6).
    pub const fn tag(self) -> u8 {
        match self {
            PieceType::Pawn => 1,
            PieceType::Knight => 2,
            PieceType::Bishop => 3,
            PieceType::Rook => 4,
            PieceType::Queen => 5,
            PieceType::King => 6,
        }
    }

    /// Parse a circuit tag (1..=6).
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PieceType::Pawn),
            2 => Some(PieceType::Knight),
            3 => Some(PieceType::Bishop),
            4 => Some(PieceType::Rook),
            5 => Some(PieceType::Queen),
            6 => Some(PieceType::King),
            _ => None,
        }
    }

    /// Lower-case letter used in position strings and move encodings.
    pub const fn letter(self) -> char {
        match self {
            PieceType::Pawn => 'p',
            PieceType::Knight => 'n',
            PieceType::Bishop => 'b',
            PieceType::Rook => 'r',
            PieceType::Queen => 'q',
            PieceType::King => 'k',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'p' => Some(PieceType::Pawn),
            'n' => Some(PieceType::Knight),
            'b' => Some(PieceType::Bishop),
            'r' => Some(PieceType::Rook),
            'q' => Some(PieceType::Queen),
            'k' => Some(PieceType::King),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PieceType::Pawn => "pawn",
            PieceType::Knight => "knight",
            PieceType::Bishop => "bishop",
            PieceType::Rook => "rook",
            PieceType::Queen => "queen",
            PieceType::King => "king",
        }
    }
}

/// A coloured piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub side: Side,
    pub kind: PieceType,
}

impl Piece {
    pub const fn new(side: Side, kind: PieceType) -> Self {
        Self { side, kind }
    }

    /// Position-string letter: upper case for white, lower case for black.
    pub fn letter(self) -> char {
        match self.side {
            Side::White => self.kind.letter().to_ascii_uppercase(),
            Side::Black => self.kind.letter(),
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        let kind = PieceType::from_letter(c)?;
        let side = if c.is_ascii_uppercase() {
            Side::White
        } else {
            Side::Black
        };
        Some(Self { side, kind })
    }
}

/// A board square, 0 = a1 .. 7 = h1 .. 63 = h8.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Square(u8);

impl Square {
    pub const fn new(index: u8) -> Option<Self> {
        if index < 64 {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Build from file (0 = a) and rank (0 = first rank).
    pub const fn from_coords(file: i8, rank: i8) -> Option<Self> {
        if file < 0 || file > 7 || rank < 0 || rank > 7 {
            return None;
        }
        Some(Self((rank * 8 + file) as u8))
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    pub const fn file(self) -> i8 {
        (self.0 % 8) as i8
    }

    pub const fn rank(self) -> i8 {
        (self.0 / 8) as i8
    }

    /// Square reached by a file/rank offset, if still on the board.
    pub const fn offset(self, df: i8, dr: i8) -> Option<Self> {
        Self::from_coords(self.file() + df, self.rank() + dr)
    }

    pub const fn bit(self) -> u64 {
        1u64 << self.0
    }

    /// Parse algebraic notation such as `e4`.
    pub fn from_notation(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let file = chars.next()?;
        let rank = chars.next()?;
        if chars.next().is_some() || !('a'..='h').contains(&file) || !('1'..='8').contains(&rank) {
            return None;
        }
        Self::from_coords((file as u8 - b'a') as i8, (rank as u8 - b'1') as i8)
    }

    pub fn to_notation(self) -> String {
        format!("{}{}", (b'a' + self.file() as u8) as char, self.rank() + 1)
    }

    pub fn all() -> impl Iterator<Item = Square> {
        (0..64u8).map(Square)
    }
}

impl fmt::Debug for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Square({})", self.to_notation())
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_notation())
    }
}

impl FromStr for Square {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_notation(s).ok_or_else(|| CoreError::InvalidSquare(s.to_string()))
    }
}

/// The three dice gating which piece types may move this turn.
///
/// `None` is the "unrolled" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DiceTriple(pub [Option<PieceType>; 3]);

impl DiceTriple {
    /// All three dice unrolled.
    pub const UNROLLED: Self = Self([None, None, None]);

    pub const fn new(dice: [Option<PieceType>; 3]) -> Self {
        Self(dice)
    }

    /// Decode the ledger encoding: 0..=5 is pawn..king, 6 (or anything
    /// out of range) is unrolled.
    pub fn from_contract(values: [u64; 3]) -> Self {
        let conv = |v: u64| {
            if v < 6 {
                PieceType::from_tag(v as u8 + 1)
            } else {
                None
            }
        };
        Self([conv(values[0]), conv(values[1]), conv(values[2])])
    }

    pub fn is_unrolled(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Whether any die shows the given piece type.
    pub fn allows(&self, kind: PieceType) -> bool {
        self.0.iter().any(|d| *d == Some(kind))
    }

    /// Circuit tags with 0 for unrolled dice.
    pub fn tags(&self) -> [u8; 3] {
        self.0.map(|d| d.map_or(0, PieceType::tag))
    }
}

/// Identifier of a game session on the ledger.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(Self)
            .map_err(|_| CoreError::InvalidSessionId(s.to_string()))
    }
}

/// Identifier of a remote entity in the state indexer.
///
/// Different entity kinds belonging to one session have different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A player's 32-byte ledger address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerAddress(pub [u8; 32]);

impl PlayerAddress {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a hex address, with or without `0x`, left-padding to 32 bytes.
    ///
    /// `0x1` and `0x00..01` parse to the same address.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 64 {
            return Err(CoreError::InvalidAddress(s.to_string()));
        }
        let padded = format!("{:0>64}", digits.to_ascii_lowercase());
        let bytes = hex::decode(padded).map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Canonical form: `0x` followed by 64 lower-case hex digits.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PlayerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerAddress({}..)", &self.to_hex()[..18])
    }
}

impl fmt::Display for PlayerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PlayerAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_notation() {
        let e4 = Square::from_notation("e4").unwrap();
        assert_eq!(e4.index(), 28);
        assert_eq!(e4.to_notation(), "e4");
        assert_eq!(Square::from_notation("a1").unwrap().index(), 0);
        assert_eq!(Square::from_notation("h8").unwrap().index(), 63);
        assert!(Square::from_notation("i1").is_none());
        assert!(Square::from_notation("a9").is_none());
        assert!(Square::from_notation("a10").is_none());
    }

    #[test]
    fn test_dice_from_contract() {
        let dice = DiceTriple::from_contract([0, 4, 6]);
        assert_eq!(
            dice,
            DiceTriple::new([Some(PieceType::Pawn), Some(PieceType::Queen), None])
        );
        assert_eq!(dice.tags(), [1, 5, 0]);
        assert!(dice.allows(PieceType::Queen));
        assert!(!dice.allows(PieceType::King));
        assert!(DiceTriple::from_contract([6, 6, 6]).is_unrolled());
    }

    #[test]
    fn test_address_canonicalization() {
        let short = PlayerAddress::from_hex("0x1").unwrap();
        let long = PlayerAddress::from_hex(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(short, long);
        assert_eq!(PlayerAddress::from_hex("0xABC").unwrap(), PlayerAddress::from_hex("abc").unwrap());
        assert!(PlayerAddress::from_hex("0xzz").is_err());
        assert!(PlayerAddress::from_hex("").is_err());
    }

    #[test]
    fn test_session_id_parse() {
        assert_eq!("42".parse::<SessionId>().unwrap(), SessionId(42));
        assert_eq!("0x2a".parse::<SessionId>().unwrap(), SessionId(42));
        assert!("forty".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_side_turn_flag() {
        assert_eq!(Side::from_turn_flag(0), Side::White);
        assert_eq!(Side::from_turn_flag(1), Side::Black);
        assert_eq!(Side::White.opponent(), Side::Black);
    }
}
