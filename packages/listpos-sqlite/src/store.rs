use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use tracing::{trace, warn};

use listpos_core::{
    BulkUpdate, Error, Filter, FindOne, ListSchema, ListStore, OrderBy, RecordId, RecordStore,
    Result, RowUpdate, Value,
};

use crate::sql;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn storage(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// SQLite-backed list store.
///
/// `atomically` uses savepoints, so it composes with a transaction the host already opened on
/// the same connection and with nested calls from the position hooks.
pub struct SqliteListStore {
    conn: Connection,
    depth: usize,
}

impl SqliteListStore {
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Ok(Self::from_connection(conn))
    }

    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(storage)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn, depth: 0 }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Index the scope columns followed by the position column, which is what both the tail
    /// lookup and the range shifts filter on.
    pub fn ensure_position_index(&self, schema: &ListSchema) -> Result<()> {
        let columns: Vec<String> = schema
            .scope_fields
            .iter()
            .chain(std::iter::once(&schema.position_field))
            .map(|c| sql::quote_ident(c))
            .collect();
        let index = sql::quote_ident(&format!("idx_{}_listpos", schema.table));
        self.conn
            .execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS {index} ON {} ({})",
                sql::quote_ident(&schema.table),
                columns.join(", ")
            ))
            .map_err(storage)
    }

    fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<usize> {
        trace!(sql, "sqlite execute");
        self.conn
            .execute(sql, params_from_iter(params))
            .map_err(storage)
    }
}

impl ListStore for SqliteListStore {
    fn find_one(&mut self, query: &FindOne) -> Result<Option<i64>> {
        let (sql, params) = sql::find_one(query);
        trace!(sql = %sql, "sqlite find_one");
        let mut stmt = self.conn.prepare_cached(&sql).map_err(storage)?;
        let mut rows = stmt.query(params_from_iter(params)).map_err(storage)?;
        let Some(row) = rows.next().map_err(storage)? else {
            return Ok(None);
        };
        let value: Option<i64> = row.get(0).map_err(storage)?;
        value
            .map(Some)
            .ok_or_else(|| Error::Storage(format!("`{}` of the first row is NULL", query.column)))
    }

    fn bulk_update(&mut self, update: &BulkUpdate) -> Result<u64> {
        let (sql, params) = sql::bulk_update(update);
        let changed = self.execute(&sql, params)?;
        Ok(changed as u64)
    }

    fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1)")
            .map_err(storage)?;
        let rows = stmt
            .query_map([table], |row| row.get::<_, String>(0))
            .map_err(storage)?;
        let mut columns = Vec::new();
        for column in rows {
            columns.push(column.map_err(storage)?);
        }
        if columns.is_empty() {
            return Err(Error::Storage(format!("no such table: {table}")));
        }
        Ok(columns)
    }

    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let name = format!("listpos_{}", self.depth);
        self.conn
            .execute_batch(&format!("SAVEPOINT {name}"))
            .map_err(storage)?;
        self.depth += 1;
        let res = f(self);
        self.depth -= 1;

        match res {
            Ok(v) => {
                self.conn
                    .execute_batch(&format!("RELEASE {name}"))
                    .map_err(storage)?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
                {
                    warn!(savepoint = %name, error = %rollback, "savepoint rollback failed");
                }
                Err(e)
            }
        }
    }
}

impl RecordStore for SqliteListStore {
    fn insert_row(&mut self, table: &str, id_field: &str, values: &[(String, Value)]) -> Result<RecordId> {
        let (sql, params) = sql::insert(table, values);
        self.execute(&sql, params)?;
        match values.iter().find(|(c, _)| c == id_field) {
            Some((_, Value::Int(id))) => Ok(RecordId(*id)),
            _ => Ok(RecordId(self.conn.last_insert_rowid())),
        }
    }

    fn update_row(&mut self, update: &RowUpdate) -> Result<()> {
        let Some((sql, params)) = sql::update_row(update) else {
            return Ok(());
        };
        if self.execute(&sql, params)? > 0 {
            return Ok(());
        }
        Err(match update.lock_version {
            Some(_) => Error::StaleWrite {
                table: update.table.clone(),
                id: update.id,
            },
            None => Error::Storage(format!("{} record {} not found", update.table, update.id)),
        })
    }

    fn delete_row(&mut self, table: &str, id_field: &str, id: RecordId) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            sql::quote_ident(table),
            sql::quote_ident(id_field)
        );
        Ok(self.execute(&sql, vec![SqlValue::Integer(id.0)])? > 0)
    }

    fn load_rows(
        &mut self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
        columns: &[&str],
    ) -> Result<Vec<Vec<Value>>> {
        let (sql, params) = sql::select(table, filter, order, columns);
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let width = columns.len();
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i).map(sql::from_sql))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })
            .map_err(storage)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(storage)?);
        }
        Ok(out)
    }
}
