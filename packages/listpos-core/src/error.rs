use thiserror::Error;

use crate::ids::RecordId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("stale write: {table} record {id} was modified concurrently")]
    StaleWrite { table: String, id: RecordId },
    #[error("scope resolution failed: {0}")]
    ScopeResolution(String),
}
