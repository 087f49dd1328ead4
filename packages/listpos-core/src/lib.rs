#![forbid(unsafe_code)]
//! Ordered-list positions for rows of a relational table.
//!
//! Rows are partitioned into scopes by zero or more columns, and each scope is kept numbered
//! `1..=N` without gaps or duplicates. The crate never loads a scope into memory: creation reads
//! the tail position, and every other correction is a bulk conditional shift issued through a
//! [`ListStore`]. Concrete stores live in sibling crates; [`MemoryListStore`] evaluates the same
//! statements in process.

pub mod config;
pub mod error;
pub mod filter;
pub mod ids;
pub mod manager;
pub mod memory;
pub mod registry;
pub mod traits;

pub use config::{ListConfig, ListSchema};
pub use error::{Error, Result};
pub use filter::{
    BulkUpdate, Comparison, Direction, Filter, FindOne, OrderBy, Predicate, RowUpdate, Shift,
};
pub use ids::{ListRecord, RecordId, ScopeKey, Value};
pub use manager::ListPositionManager;
pub use memory::MemoryListStore;
pub use registry::ListRegistry;
pub use traits::{ListStore, RecordStore};
