#![forbid(unsafe_code)]
//! SQLite backend for the list position hooks.
//!
//! Statements are rendered from the structured filters in `listpos-core` with quoted identifiers
//! and bound parameters; grouping uses savepoints so hooks nest inside host transactions.

mod sql;
mod store;

pub use store::SqliteListStore;
