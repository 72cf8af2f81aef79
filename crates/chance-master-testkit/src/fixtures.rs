//! Test fixtures and helpers.
//!
//! A [`SessionFixture`] owns a seeded [`MemoryIndexer`] plus the snapshots
//! it was seeded with, and pushes live updates the way the indexer would
//! after a ledger write.

use std::sync::Arc;

use chance_master_core::{
    resolve_move, rules, ClaimKind, ClaimSnapshot, ClockSnapshot, DiceTriple, EntityId,
    GameResult, GameStatus, ManualClock, MoveRejection, PieceType, PlayerAddress, PlayerSnapshot,
    Position, SessionId, SessionSnapshot, Side, Square, TimeSource,
};
use chance_master_indexer::{MemoryIndexer, ModelUpdate};
use chance_master_sync::{SyncConfig, Synchronizer};

pub const SESSION_ENTITY: &str = "session";
pub const BOARD_ENTITY: &str = "board";
pub const CLOCK_ENTITY: &str = "clock";
pub const CLAIM_ENTITY: &str = "claim";

/// Wall time the fixture clock starts at, matching the clock snapshot.
pub const FIXTURE_EPOCH_MS: u64 = 1_000_000;

/// A two-player session seeded into an in-memory indexer.
pub struct SessionFixture {
    pub indexer: Arc<MemoryIndexer>,
    pub session: SessionSnapshot,
    pub position: Position,
    pub clock: ClockSnapshot,
    pub claim: ClaimSnapshot,
    pub time: Arc<ManualClock>,
}

impl SessionFixture {
    /// A fresh game at the starting position with unrolled dice and five
    /// minutes on each clock.
    pub fn new(id: SessionId) -> Self {
        Self::with_players(
            id,
            PlayerAddress::from_bytes([1; 32]),
            PlayerAddress::from_bytes([2; 32]),
        )
    }

    /// Like [`new`](Self::new) with a random session id and random players.
    pub fn random() -> Self {
        Self::with_players(
            SessionId(rand::random::<u32>() as u64 + 1),
            PlayerAddress::from_bytes(rand::random()),
            PlayerAddress::from_bytes(rand::random()),
        )
    }

    pub fn with_players(id: SessionId, white: PlayerAddress, black: PlayerAddress) -> Self {
        Self {
            indexer: Arc::new(MemoryIndexer::new()),
            session: SessionSnapshot {
                id,
                white,
                black,
                turn: Side::White,
                status: GameStatus::Active,
                result: GameResult::None,
                white_draw_offered: false,
                black_draw_offered: false,
                claim: ClaimKind::None,
                dice: DiceTriple::UNROLLED,
            },
            position: Position::start(),
            clock: ClockSnapshot {
                white_remaining_secs: 300,
                black_remaining_secs: 300,
                last_updated_secs: FIXTURE_EPOCH_MS / 1_000,
            },
            claim: ClaimSnapshot::default(),
            time: Arc::new(ManualClock::new(FIXTURE_EPOCH_MS)),
        }
    }

    pub fn with_dice(mut self, dice: [Option<PieceType>; 3]) -> Self {
        self.session.dice = DiceTriple::new(dice);
        self
    }

    /// Start from `position`; the session turn follows its side to move.
    pub fn with_position(mut self, position: Position) -> Self {
        self.session.turn = position.side_to_move;
        self.position = position;
        self
    }

    pub fn with_clock(mut self, white_secs: u64, black_secs: u64) -> Self {
        self.clock.white_remaining_secs = white_secs;
        self.clock.black_remaining_secs = black_secs;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> SessionId {
        self.session.id
    }

    pub fn white(&self) -> PlayerAddress {
        self.session.white
    }

    pub fn black(&self) -> PlayerAddress {
        self.session.black
    }

    pub fn session_entity(&self) -> EntityId {
        EntityId::new(SESSION_ENTITY)
    }

    pub fn board_entity(&self) -> EntityId {
        EntityId::new(BOARD_ENTITY)
    }

    pub fn clock_entity(&self) -> EntityId {
        EntityId::new(CLOCK_ENTITY)
    }

    pub fn claim_entity(&self) -> EntityId {
        EntityId::new(CLAIM_ENTITY)
    }

    /// Entity id of a player record.
    pub fn player_entity(address: &PlayerAddress) -> EntityId {
        EntityId::new(format!("player-{}", address.to_hex()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert the four session entities, plus both players as seated in
    /// this session.
    pub fn seed(&self) -> &Self {
        let id = self.id();
        self.indexer.insert_session(SESSION_ENTITY, self.session.clone());
        self.indexer
            .insert_board(id, BOARD_ENTITY, self.position.to_board());
        self.indexer.insert_clock(id, CLOCK_ENTITY, self.clock);
        self.indexer.insert_claim(id, CLAIM_ENTITY, self.claim);
        for address in [self.white(), self.black()] {
            self.seed_player(address, true, Some(id));
        }
        self
    }

    /// Insert (or replace) a player record.
    pub fn seed_player(
        &self,
        address: PlayerAddress,
        in_game: bool,
        last_session: Option<SessionId>,
    ) -> PlayerSnapshot {
        let player = PlayerSnapshot {
            address,
            is_enqueued: false,
            is_in_game: in_game,
            last_session,
        };
        self.indexer
            .insert_player(Self::player_entity(&address).0, player.clone());
        player
    }

    /// A synchronizer over this fixture's indexer and manual clock.
    pub fn synchronizer(&self, config: SyncConfig) -> Synchronizer<MemoryIndexer> {
        Synchronizer::with_time_source(self.indexer.clone(), config, self.time.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Live updates
    // ─────────────────────────────────────────────────────────────────────────

    /// Edit the session and push it. Returns the number of subscribers
    /// reached.
    pub fn push_session(&mut self, edit: impl FnOnce(&mut SessionSnapshot)) -> usize {
        edit(&mut self.session);
        self.indexer.push(
            &self.session_entity(),
            vec![ModelUpdate::Session(self.session.clone())],
        )
    }

    pub fn push_board(&mut self, position: Position) -> usize {
        self.position = position;
        self.indexer.push(
            &self.board_entity(),
            vec![ModelUpdate::Board {
                session: self.id(),
                board: self.position.to_board(),
            }],
        )
    }

    pub fn push_clock(&mut self, clock: ClockSnapshot) -> usize {
        self.clock = clock;
        self.indexer.push(
            &self.clock_entity(),
            vec![ModelUpdate::Clock {
                session: self.id(),
                clock,
            }],
        )
    }

    pub fn push_claim(&mut self, claim: ClaimKind) -> usize {
        self.claim = ClaimSnapshot { claim };
        self.indexer.push(
            &self.claim_entity(),
            vec![ModelUpdate::Claim {
                session: self.id(),
                claim: self.claim,
            }],
        )
    }

    pub fn push_player(&self, player: PlayerSnapshot) -> usize {
        self.indexer.push(
            &Self::player_entity(&player.address),
            vec![ModelUpdate::Player(player)],
        )
    }

    /// Confirm a move as the ledger would: new board, elapsed time charged
    /// to the mover, turn handed over and dice reset to unrolled.
    pub fn confirm_move(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<PieceType>,
    ) -> Result<Position, MoveRejection> {
        let mv = resolve_move(&self.position, from, to, promotion)
            .ok_or(MoveRejection::IllegalMove { from, to })?;
        let mover = self.position.side_to_move;
        let next = rules::apply(&self.position, &mv);
        self.push_board(next.clone());
        self.push_clock(self.charged_clock(mover));
        self.push_session(|s| {
            s.turn = next.side_to_move;
            s.dice = DiceTriple::UNROLLED;
        });
        Ok(next)
    }

    /// The clock snapshot the ledger would write at the fixture's current
    /// time, with the elapsed seconds taken from `mover`.
    pub fn charged_clock(&self, mover: Side) -> ClockSnapshot {
        let now_secs = self.time.now_ms() / 1_000;
        let elapsed = now_secs.saturating_sub(self.clock.last_updated_secs);
        let mut clock = self.clock;
        match mover {
            Side::White => {
                clock.white_remaining_secs = clock.white_remaining_secs.saturating_sub(elapsed)
            }
            Side::Black => {
                clock.black_remaining_secs = clock.black_remaining_secs.saturating_sub(elapsed)
            }
        }
        clock.last_updated_secs = now_secs;
        clock
    }
}

impl Default for SessionFixture {
    fn default() -> Self {
        Self::new(SessionId(1))
    }
}

/// Parse a square in algebraic notation. Panics on bad input.
pub fn sq(s: &str) -> Square {
    match Square::from_notation(s) {
        Some(square) => square,
        None => panic!("bad square {s:?}"),
    }
}
