//! # Chance Master Sync
//!
//! Keeps a local, render-ready projection of one game session in step with
//! the remote indexer, decides whether the local player may view a
//! session, and commits moves through the proof service and the ledger.
//!
//! ## Overview
//!
//! - [`Synchronizer`] seeds the four session entities, subscribes to each
//!   and republishes a [`LocalProjection`] after every relevant write.
//! - [`EntryGuard`] and [`LiveGuard`] route a navigation to the right
//!   session, the lobby or home.
//! - [`MovePipeline`] validates a move, obtains a proof, shows the move
//!   optimistically and submits it.
//!
//! ## Key Properties
//!
//! - **Recomputed**: the projection is a pure function of the confirmed
//!   snapshots plus the optimistic overlay, never patched in place
//! - **Generation-keyed**: late updates and stale timers from a torn-down
//!   session are discarded
//! - **Optimistic**: a proven move is shown at once and reconciled by the
//!   next confirmed snapshot, or reverted after a timeout
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chance_master_indexer::MemoryIndexer;
//! use chance_master_sync::{SyncConfig, Synchronizer};
//! use chance_master_core::SessionId;
//!
//! async fn example() {
//!     let indexer = Arc::new(MemoryIndexer::new());
//!     let mut sync = Synchronizer::new(indexer, SyncConfig::default());
//!     // sync.attach(SessionId(1)).await?;
//!     // loop { let events = sync.pump().await; ... }
//!     let _ = (&mut sync, SessionId(1));
//! }
//! ```

pub mod error;
pub mod events;
pub mod guard;
pub mod pipeline;
pub mod projection;
pub mod prover;
pub mod services;
pub mod synchronizer;
pub mod timer;

pub use error::{CommitError, Result, ServiceError, SyncError};
pub use events::{Level, Notification, SyncEvent};
pub use guard::{Admission, EntryGuard, GuardConfig, GuardDecision, LiveGuard};
pub use pipeline::{
    validate_move, CommitOutcome, MovePipeline, PendingMove, PipelineConfig, PipelineState,
};
pub use projection::{LocalProjection, Overlay, OverlayBoard, Seat};
pub use prover::HttpProver;
pub use services::{
    fire_and_forget, memory::RecordingLedger, memory::ScriptedProver, Ledger, LedgerCall,
    ProofRequest, ProofResponse, ProofService, TxHandle,
};
pub use synchronizer::{Inbound, SyncConfig, Synchronizer};
pub use timer::Deferred;
