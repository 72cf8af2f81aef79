//! # Chance Master Indexer
//!
//! Client side of the state-indexer protocol. Provides seed queries for the
//! four session entities and a player's matchmaking record, and live
//! subscriptions keyed by remote entity id.
//!
//! ## Key Types
//!
//! - [`Indexer`] - The async trait for seed queries and subscriptions
//! - [`GraphqlIndexer`] - GraphQL over HTTP plus a shared websocket
//! - [`MemoryIndexer`] - In-memory indexer for tests
//! - [`Subscription`] - A cancelable live handle on one entity
//! - [`ModelUpdate`] - A decoded update, one of player, session, board,
//!   clock or claim
//!
//! ## Design Notes
//!
//! - **Strong decoding**: wire payloads are a tagged union on `__typename`
//!   and are decoded into core snapshot types at the boundary.
//! - **Entity keyed**: subscriptions are keyed by the entity id returned
//!   with each seed, never by session id.
//! - **Closed means closed**: a closed subscription yields nothing more,
//!   even updates already buffered.

pub mod error;
pub mod graphql;
pub mod memory;
pub mod models;
pub mod traits;

pub use error::{IndexerError, Result};
pub use graphql::{GraphqlIndexer, SubscriptionHub};
pub use memory::MemoryIndexer;
pub use models::{decode_models, ModelUpdate, RemoteModel};
pub use traits::{Indexer, Seeded, Subscription, SubscriptionSender};
