use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::filter::{BulkUpdate, Direction, Filter, FindOne, OrderBy, RowUpdate};
use crate::ids::{RecordId, Value};
use crate::traits::{ListStore, RecordStore};

type Row = BTreeMap<String, Value>;

#[derive(Clone, Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    id_field: String,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemoryTable {
    fn row_mut(&mut self, id_field: &str, id: RecordId) -> Option<&mut Row> {
        let id = Value::from(id);
        self.rows.iter_mut().find(|r| r.get(id_field) == Some(&id))
    }
}

/// In-memory tables evaluating the same structured filters the SQL backends render.
///
/// Useful for tests and for hosts that keep small lists in process; `atomically` snapshots
/// every table and restores the snapshot when the closure fails.
#[derive(Clone, Debug, Default)]
pub struct MemoryListStore {
    tables: HashMap<String, MemoryTable>,
    statements: u64,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a table. `id_field` is assigned sequentially on insert when absent.
    pub fn create_table<S: AsRef<str>>(&mut self, name: &str, id_field: &str, columns: &[S]) {
        let mut cols: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        if !cols.iter().any(|c| c == id_field) {
            cols.insert(0, id_field.to_string());
        }
        self.tables.insert(
            name.to_string(),
            MemoryTable {
                columns: cols,
                id_field: id_field.to_string(),
                rows: Vec::new(),
                next_id: 1,
            },
        );
    }

    /// Number of `find_one` and `bulk_update` calls served so far.
    pub fn statements(&self) -> u64 {
        self.statements
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::Storage(format!("no such table: {name}")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::Storage(format!("no such table: {name}")))
    }
}

fn row_matches(filter: &Filter, row: &Row) -> bool {
    filter.eval(|field| row.get(field))
}

fn cmp_column(a: &Row, b: &Row, order: &OrderBy) -> Ordering {
    let ord = match (a.get(&order.field), b.get(&order.field)) {
        (Some(Value::Int(x)), Some(Value::Int(y))) => x.cmp(y),
        (Some(Value::Text(x)), Some(Value::Text(y))) => x.cmp(y),
        (Some(Value::Bytes(x)), Some(Value::Bytes(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        // NULLs sort first, as SQLite does.
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    };
    match order.direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

impl ListStore for MemoryListStore {
    fn find_one(&mut self, query: &FindOne) -> Result<Option<i64>> {
        self.statements += 1;
        let table = self.table(&query.table)?;
        let first = table
            .rows
            .iter()
            .filter(|r| row_matches(&query.filter, r))
            .min_by(|a, b| cmp_column(a, b, &query.order));
        let Some(row) = first else {
            return Ok(None);
        };
        match row.get(&query.column) {
            Some(Value::Int(v)) => Ok(Some(*v)),
            other => Err(Error::Storage(format!(
                "`{}` is not an integer: {other:?}",
                query.column
            ))),
        }
    }

    fn bulk_update(&mut self, update: &BulkUpdate) -> Result<u64> {
        self.statements += 1;
        let table = self.table_mut(&update.table)?;
        let mut touched = 0;
        for row in table.rows.iter_mut().filter(|r| row_matches(&update.filter, r)) {
            match row.get_mut(&update.shift.field) {
                Some(Value::Int(v)) => *v += update.shift.delta,
                _ => continue,
            }
            if let Some(lock) = &update.shift.lock_version {
                if let Some(Value::Int(v)) = row.get_mut(lock) {
                    *v += 1;
                }
            }
            touched += 1;
        }
        Ok(touched)
    }

    fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        Ok(self.table(table)?.columns.clone())
    }

    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let snapshot = self.tables.clone();
        let res = f(self);
        if res.is_err() {
            self.tables = snapshot;
        }
        res
    }
}

impl RecordStore for MemoryListStore {
    fn insert_row(&mut self, table: &str, id_field: &str, values: &[(String, Value)]) -> Result<RecordId> {
        let t = self.table_mut(table)?;
        if let Some((col, _)) = values.iter().find(|(c, _)| !t.columns.contains(c)) {
            return Err(Error::Storage(format!("table {table} has no column named {col}")));
        }
        let mut row: Row = t.columns.iter().map(|c| (c.clone(), Value::Null)).collect();
        for (col, value) in values {
            row.insert(col.clone(), value.clone());
        }
        let id = match row.get(id_field) {
            Some(Value::Int(v)) => RecordId(*v),
            _ => {
                let id = RecordId(t.next_id);
                row.insert(id_field.to_string(), id.into());
                id
            }
        };
        let id_value = Value::from(id);
        if t.rows.iter().any(|r| r.get(id_field) == Some(&id_value)) {
            return Err(Error::Storage(format!("UNIQUE constraint failed: {table}.{id_field}")));
        }
        t.next_id = t.next_id.max(id.0 + 1);
        t.rows.push(row);
        Ok(id)
    }

    fn update_row(&mut self, update: &RowUpdate) -> Result<()> {
        let t = self.table_mut(&update.table)?;
        let Some(row) = t.row_mut(&update.id_field, update.id) else {
            return Err(match &update.lock_version {
                Some(_) => Error::StaleWrite {
                    table: update.table.clone(),
                    id: update.id,
                },
                None => Error::Storage(format!("{} record {} not found", update.table, update.id)),
            });
        };
        if let Some((column, expected)) = &update.lock_version {
            if row.get(column) != Some(&Value::Int(*expected)) {
                return Err(Error::StaleWrite {
                    table: update.table.clone(),
                    id: update.id,
                });
            }
            row.insert(column.clone(), Value::Int(expected + 1));
        }
        for (col, value) in &update.assignments {
            row.insert(col.clone(), value.clone());
        }
        Ok(())
    }

    fn delete_row(&mut self, table: &str, id_field: &str, id: RecordId) -> Result<bool> {
        let t = self.table_mut(table)?;
        let id = Value::from(id);
        let before = t.rows.len();
        t.rows.retain(|r| r.get(id_field) != Some(&id));
        Ok(t.rows.len() != before)
    }

    fn load_rows(
        &mut self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
        columns: &[&str],
    ) -> Result<Vec<Vec<Value>>> {
        let t = self.table(table)?;
        let mut rows: Vec<&Row> = t.rows.iter().filter(|r| row_matches(filter, r)).collect();
        rows.sort_by(|a, b| cmp_column(a, b, order).then_with(|| cmp_column(a, b, &OrderBy::asc(&t.id_field))));
        Ok(rows
            .into_iter()
            .map(|r| {
                columns
                    .iter()
                    .map(|c| r.get(*c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect())
    }
}
