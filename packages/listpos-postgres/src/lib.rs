#![forbid(unsafe_code)]
//! PostgreSQL backend for the list position hooks.
//!
//! Works against vanilla PostgreSQL through a shared synchronous [`postgres::Client`]. Writers
//! creating in the same scope are serialized with transaction-scoped advisory locks, so the
//! tail lookup and the insert that follows it cannot interleave across connections.

mod lock;
mod sql;
mod store;

pub use lock::scope_lock_key;
pub use store::PgListStore;
