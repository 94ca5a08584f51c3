//! Durable store adapters for Tally.
//!
//! The durable per-guild document is only ever written through bulk
//! increment-or-upsert operations; it is never overwritten wholesale.

pub mod sqlite_store;
pub mod store;

pub use sqlite_store::SqliteActivityStore;
pub use store::{ActivityStore, InMemoryActivityStore};
