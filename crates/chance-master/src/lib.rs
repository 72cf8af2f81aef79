//! # Chance Master
//!
//! Client engine for Chance Master, a two-player chess variant where each
//! turn three dice decide which piece types may move, every move is backed
//! by a zero-knowledge proof, and all authoritative state lives on a
//! ledger mirrored by a GraphQL indexer.
//!
//! ## Overview
//!
//! The client keeps a render-ready projection of one session in step with
//! the indexer and lets the local player act on it:
//!
//! - **Routing**: decide whether the viewer belongs in a session, or send
//!   them to the canonical one, the lobby or home
//! - **Live state**: seed and subscribe to the session, board, clock and
//!   claim entities and republish the projection on every change
//! - **Clock**: predict both clocks between ledger updates and signal flags
//! - **Moves**: validate, prove, show optimistically and submit
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chance_master::{ClientConfig, ClientEvent, GameClient};
//! use chance_master::sync::RecordingLedger;
//!
//! async fn example() -> chance_master::Result<()> {
//!     let config = ClientConfig::from_env()?;
//!     let ledger = Arc::new(RecordingLedger::new());
//!     let mut client = GameClient::connect(config, ledger)?;
//!
//!     // client.set_identity(Some(address));
//!     client.enter(None).await?;
//!     loop {
//!         match client.next_event().await {
//!             ClientEvent::Sync(events) => { /* render */ let _ = events; }
//!             ClientEvent::Navigate(decision) => { let _ = decision; break; }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `chance_master::core` - identifiers, snapshots, codec, rules, clock
//! - `chance_master::indexer` - indexer trait, GraphQL and in-memory
//! - `chance_master::sync` - synchronizer, entry guard, move pipeline

pub mod client;
pub mod config;
pub mod error;

// Re-export component crates
pub use chance_master_core as core;
pub use chance_master_indexer as indexer;
pub use chance_master_sync as sync;

// Re-export main types for convenience
pub use client::{ClientEvent, GameClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};

// Re-export commonly used types
pub use chance_master_core::{
    ClaimKind, DiceTriple, GameResult, GameStatus, PieceType, PlayerAddress, SessionId, Side,
    Square,
};
pub use chance_master_sync::{GuardDecision, LocalProjection, Seat, SyncEvent};
