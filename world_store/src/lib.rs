//! # World Store
//!
//! The single source of truth for world state. Entities, their typed
//! components and the relationships between them live in an embedded SQLite
//! database; every write commits before it returns and is announced on an
//! in-process event bus.
//!
//! ## Core Components
//!
//! - **entities**: Ids, actors and the snapshot records returned by reads
//! - **schema**: Component schemas and the type registry modules populate at load
//! - **store**: The transactional write path
//! - **query**: Read-side operations over committed state
//! - **events**: Event records and the synchronous publish/subscribe bus
//!
//! This crate knows nothing about modules or natural language; those live in
//! `narrative_core`.

pub mod entities;
pub mod error;
pub mod events;
pub mod query;
pub mod schema;
pub mod store;

pub use entities::*;
pub use error::{StoreError, StoreResult};
pub use events::{kinds, Event, EventBus, EventHandler, EventQuery, SubscriptionId};
pub use schema::*;
pub use store::{StoreOptions, WorldStore, WriteBatch, IN_MEMORY};
