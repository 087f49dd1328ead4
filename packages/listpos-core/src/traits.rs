use crate::error::Result;
use crate::filter::{BulkUpdate, Filter, FindOne, OrderBy, RowUpdate};
use crate::ids::{RecordId, ScopeKey, Value};

/// Data-access layer the position hooks run against.
///
/// Implementations execute each call as a single statement; `atomically` groups several of them
/// so that a crash between them cannot leave a scope with a gap or a duplicate.
pub trait ListStore {
    /// Position (`query.column`) of the first row matching the filter under the given order.
    fn find_one(&mut self, query: &FindOne) -> Result<Option<i64>>;

    /// Apply the shift to every matching row; returns the number of rows touched.
    fn bulk_update(&mut self, update: &BulkUpdate) -> Result<u64>;

    /// Column names of `table`, used once when a list is configured.
    fn columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Run `f` as one atomic unit. Nested calls must compose.
    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>;

    /// Serialize writers of one scope until the enclosing transaction ends.
    ///
    /// Backends without row-level concurrency keep the default no-op.
    fn lock_scope(&mut self, _table: &str, _scope: &ScopeKey) -> Result<()> {
        Ok(())
    }
}

/// Host-side record persistence: the saves and deletes that trigger the position hooks.
pub trait RecordStore {
    /// Insert one row; the store assigns `id_field` when `values` leaves it out.
    fn insert_row(&mut self, table: &str, id_field: &str, values: &[(String, Value)]) -> Result<RecordId>;

    /// Fails with [`crate::Error::StaleWrite`] when a lock-version guard does not match.
    fn update_row(&mut self, update: &RowUpdate) -> Result<()>;

    /// Returns whether a row was removed.
    fn delete_row(&mut self, table: &str, id_field: &str, id: RecordId) -> Result<bool>;

    fn load_rows(
        &mut self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
        columns: &[&str],
    ) -> Result<Vec<Vec<Value>>>;
}
