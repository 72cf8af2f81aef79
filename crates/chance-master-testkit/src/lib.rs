//! # Chance Master Testkit
//!
//! Testing utilities for the Chance Master client.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: placement sets with the exact position strings the
//!   proof service expects
//! - **Generators**: Proptest strategies for dice, squares and random board
//!   arrangements
//! - **Fixtures**: a two-player session seeded into an in-memory indexer,
//!   with helpers that push live updates
//!
//! ## Golden Vectors
//!
//! ```rust
//! use chance_master_testkit::vectors::{all_vectors, verify_vector};
//!
//! for vector in all_vectors() {
//!     assert!(verify_vector(&vector).is_ok(), "{}", vector.name);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use chance_master_testkit::generators::{position_from_params, ArrangementParams};
//!
//! proptest! {
//!     #[test]
//!     fn board_round_trips(params: ArrangementParams) {
//!         let position = position_from_params(&params);
//!         let board = position.to_board();
//!         prop_assert_eq!(board.clone(), position.to_board());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use chance_master_core::{PieceType, SessionId};
//! use chance_master_sync::SyncConfig;
//! use chance_master_testkit::fixtures::{sq, SessionFixture};
//!
//! async fn example() {
//!     let mut fixture = SessionFixture::new(SessionId(7))
//!         .with_dice([Some(PieceType::Pawn), None, None]);
//!     fixture.seed();
//!     let mut sync = fixture.synchronizer(SyncConfig::default());
//!     sync.attach(fixture.id()).await.unwrap();
//!     fixture.confirm_move(sq("e2"), sq("e4"), None).unwrap();
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{sq, SessionFixture};
pub use generators::{position_from_params, ArrangementParams};
pub use vectors::{all_vectors, verify_all_vectors, verify_vector, vectors_json, PositionVector};
