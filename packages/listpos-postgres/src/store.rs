use std::cell::RefCell;
use std::rc::Rc;

use postgres::types::Type;
use postgres::{Client, Row};
use tracing::{trace, warn};

use listpos_core::{
    BulkUpdate, Error, Filter, FindOne, ListSchema, ListStore, OrderBy, RecordId, RecordStore,
    Result, RowUpdate, ScopeKey, Value,
};

use crate::lock::scope_lock_key;
use crate::sql::{self, quote_ident, Params};

fn storage_debug<E: std::fmt::Debug>(e: E) -> Error {
    Error::Storage(format!("{e:?}"))
}

/// PostgreSQL-backed list store over a shared client.
///
/// At depth zero `atomically` opens its own transaction; nested calls use savepoints. Hosts that
/// already hold a transaction on the client construct the store with
/// [`PgListStore::in_transaction`] so every unit becomes a savepoint.
pub struct PgListStore {
    client: Rc<RefCell<Client>>,
    depth: usize,
}

impl PgListStore {
    pub fn new(client: Rc<RefCell<Client>>) -> Self {
        Self { client, depth: 0 }
    }

    pub fn in_transaction(client: Rc<RefCell<Client>>) -> Self {
        Self { client, depth: 1 }
    }

    pub fn client(&self) -> &Rc<RefCell<Client>> {
        &self.client
    }

    /// Index the scope columns followed by the position column.
    pub fn ensure_position_index(&self, schema: &ListSchema) -> Result<()> {
        let columns: Vec<String> = schema
            .scope_fields
            .iter()
            .chain(std::iter::once(&schema.position_field))
            .map(|c| quote_ident(c))
            .collect();
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("idx_{}_listpos", schema.table)),
            quote_ident(&schema.table),
            columns.join(", ")
        );
        let mut c = self.client.borrow_mut();
        c.batch_execute(&sql).map_err(storage_debug)
    }

    fn execute(&self, sql: &str, params: &Params) -> Result<u64> {
        trace!(sql, "postgres execute");
        let mut c = self.client.borrow_mut();
        c.execute(sql, &params.as_refs()).map_err(storage_debug)
    }

    fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        trace!(sql, "postgres query");
        let mut c = self.client.borrow_mut();
        c.query(sql, &params.as_refs()).map_err(storage_debug)
    }

    fn batch(&self, sql: &str) -> Result<()> {
        let mut c = self.client.borrow_mut();
        c.batch_execute(sql).map_err(|e| Error::Storage(e.to_string()))
    }
}

fn column_value(row: &Row, idx: usize) -> Result<Value> {
    let ty = row.columns()[idx].type_().clone();
    let value = match ty {
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|v| v.map_or(Value::Null, |v| Value::Int(v.into()))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map(|v| v.map_or(Value::Null, |v| Value::Int(v.into()))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(Value::from),
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(Value::from),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(idx).map(Value::from)
        }
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).map(Value::from),
        other => {
            return Err(Error::Storage(format!(
                "unsupported column type {other} for `{}`",
                row.columns()[idx].name()
            )))
        }
    };
    value.map_err(storage_debug)
}

impl ListStore for PgListStore {
    fn find_one(&mut self, query: &FindOne) -> Result<Option<i64>> {
        let (sql, params) = sql::find_one(query);
        let rows = self.query(&sql, &params)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let value: Option<i64> = row.try_get(0).map_err(storage_debug)?;
        value
            .map(Some)
            .ok_or_else(|| Error::Storage(format!("`{}` of the first row is NULL", query.column)))
    }

    fn bulk_update(&mut self, update: &BulkUpdate) -> Result<u64> {
        let (sql, params) = sql::bulk_update(update);
        self.execute(&sql, &params)
    }

    fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        let rows = {
            let mut c = self.client.borrow_mut();
            c.query(
                "SELECT attname::TEXT FROM pg_attribute \
                 WHERE attrelid = to_regclass(quote_ident($1::TEXT)) \
                   AND attnum > 0 AND NOT attisdropped \
                 ORDER BY attnum",
                &[&table],
            )
            .map_err(storage_debug)?
        };
        if rows.is_empty() {
            return Err(Error::Storage(format!("no such table: {table}")));
        }
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(storage_debug))
            .collect()
    }

    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let depth = self.depth;
        let savepoint = format!("listpos_{depth}");
        if depth == 0 {
            self.batch("BEGIN")?;
        } else {
            self.batch(&format!("SAVEPOINT {savepoint}"))?;
        }
        self.depth += 1;
        let res = f(self);
        self.depth -= 1;

        match res {
            Ok(v) => {
                if depth == 0 {
                    self.batch("COMMIT")?;
                } else {
                    self.batch(&format!("RELEASE SAVEPOINT {savepoint}"))?;
                }
                Ok(v)
            }
            Err(e) => {
                let rollback = if depth == 0 {
                    self.batch("ROLLBACK")
                } else {
                    self.batch(&format!(
                        "ROLLBACK TO SAVEPOINT {savepoint}; RELEASE SAVEPOINT {savepoint}"
                    ))
                };
                if let Err(rollback) = rollback {
                    warn!(depth, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Transaction-scoped advisory lock on the scope; released at COMMIT or ROLLBACK.
    fn lock_scope(&mut self, table: &str, scope: &ScopeKey) -> Result<()> {
        let key = scope_lock_key(table, scope);
        trace!(table, key, "postgres scope lock");
        let mut c = self.client.borrow_mut();
        c.execute("SELECT pg_advisory_xact_lock($1::BIGINT)", &[&key])
            .map_err(storage_debug)?;
        Ok(())
    }
}

impl RecordStore for PgListStore {
    fn insert_row(&mut self, table: &str, id_field: &str, values: &[(String, Value)]) -> Result<RecordId> {
        let (sql, params) = sql::insert(table, id_field, values);
        let rows = self.query(&sql, &params)?;
        let row = rows
            .first()
            .ok_or_else(|| Error::Storage(format!("insert into {table} returned no row")))?;
        let id: i64 = row.try_get(0).map_err(storage_debug)?;
        Ok(RecordId(id))
    }

    fn update_row(&mut self, update: &RowUpdate) -> Result<()> {
        let Some((sql, params)) = sql::update_row(update) else {
            return Ok(());
        };
        if self.execute(&sql, &params)? > 0 {
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
        let (sql, params) = sql::delete(table, id_field, id.0);
        Ok(self.execute(&sql, &params)? > 0)
    }

    fn load_rows(
        &mut self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
        columns: &[&str],
    ) -> Result<Vec<Vec<Value>>> {
        let (sql, params) = sql::select(table, filter, order, columns);
        let rows = self.query(&sql, &params)?;
        rows.iter()
            .map(|row| {
                (0..columns.len())
                    .map(|i| column_value(row, i))
                    .collect::<Result<Vec<Value>>>()
            })
            .collect()
    }
}
