use postgres::types::ToSql;

use listpos_core::{BulkUpdate, Comparison, Direction, Filter, FindOne, OrderBy, RowUpdate, Value};

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Owned statement parameter. Every placeholder is rendered with an explicit cast, so the
/// server never has to infer a type from the column it is compared with.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Param {
    Int(i64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
}

impl Param {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Param::Int(v) => v,
            Param::Bool(v) => v,
            Param::Text(v) => v,
            Param::Bytes(v) => v,
        }
    }
}

#[derive(Default, Debug)]
pub(crate) struct Params {
    values: Vec<Param>,
}

impl Params {
    /// Placeholder for `value`; NULL is inlined since it carries no type.
    pub(crate) fn push(&mut self, value: &Value) -> String {
        let (param, cast) = match value {
            Value::Null => return "NULL".to_string(),
            Value::Int(v) => (Param::Int(*v), "BIGINT"),
            Value::Bool(v) => (Param::Bool(*v), "BOOLEAN"),
            Value::Text(v) => (Param::Text(v.clone()), "TEXT"),
            Value::Bytes(v) => (Param::Bytes(v.clone()), "BYTEA"),
        };
        self.values.push(param);
        format!("${}::{cast}", self.values.len())
    }

    pub(crate) fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values.iter().map(Param::as_sql).collect()
    }

    #[cfg(test)]
    pub(crate) fn values(&self) -> &[Param] {
        &self.values
    }
}

fn where_clause(filter: &Filter, params: &mut Params) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = filter
        .predicates
        .iter()
        .map(|p| match p.comparison {
            Comparison::IsNull => format!("{} IS NULL", quote_ident(&p.field)),
            cmp => format!(
                "{} {} {}",
                quote_ident(&p.field),
                cmp.sql_operator(),
                params.push(&p.value)
            ),
        })
        .collect();
    format!(" WHERE {}", terms.join(" AND "))
}

/// NULLs sort below every value, matching SQLite and the memory store in both directions.
fn order_clause(order: &OrderBy) -> String {
    let nulls = match order.direction {
        Direction::Asc => "NULLS FIRST",
        Direction::Desc => "NULLS LAST",
    };
    format!(
        " ORDER BY {} {} {nulls}",
        quote_ident(&order.field),
        order.direction.sql_keyword()
    )
}

pub(crate) fn find_one(query: &FindOne) -> (String, Params) {
    let mut params = Params::default();
    let sql = format!(
        "SELECT {}::BIGINT FROM {}{}{} LIMIT 1",
        quote_ident(&query.column),
        quote_ident(&query.table),
        where_clause(&query.filter, &mut params),
        order_clause(&query.order),
    );
    (sql, params)
}

pub(crate) fn bulk_update(update: &BulkUpdate) -> (String, Params) {
    let mut params = Params::default();
    let field = quote_ident(&update.shift.field);
    let delta = params.push(&Value::Int(update.shift.delta));
    let mut set = format!("{field} = {field} + {delta}");
    if let Some(lock) = &update.shift.lock_version {
        let lock = quote_ident(lock);
        set.push_str(&format!(", {lock} = {lock} + 1"));
    }
    let sql = format!(
        "UPDATE {} SET {set}{}",
        quote_ident(&update.table),
        where_clause(&update.filter, &mut params)
    );
    (sql, params)
}

pub(crate) fn insert(table: &str, id_field: &str, values: &[(String, Value)]) -> (String, Params) {
    let mut params = Params::default();
    let returning = format!("RETURNING {}::BIGINT", quote_ident(id_field));
    if values.is_empty() {
        let sql = format!("INSERT INTO {} DEFAULT VALUES {returning}", quote_ident(table));
        return (sql, params);
    }
    let columns: Vec<String> = values.iter().map(|(c, _)| quote_ident(c)).collect();
    let placeholders: Vec<String> = values.iter().map(|(_, v)| params.push(v)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) {returning}",
        quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    );
    (sql, params)
}

pub(crate) fn update_row(update: &RowUpdate) -> Option<(String, Params)> {
    let mut params = Params::default();
    let mut sets: Vec<String> = update
        .assignments
        .iter()
        .map(|(column, value)| format!("{} = {}", quote_ident(column), params.push(value)))
        .collect();
    if let Some((lock, _)) = &update.lock_version {
        let lock = quote_ident(lock);
        sets.push(format!("{lock} = {lock} + 1"));
    }
    if sets.is_empty() {
        return None;
    }

    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        quote_ident(&update.table),
        sets.join(", "),
        quote_ident(&update.id_field),
        params.push(&Value::Int(update.id.0))
    );
    if let Some((lock, expected)) = &update.lock_version {
        sql.push_str(&format!(
            " AND {} = {}",
            quote_ident(lock),
            params.push(&Value::Int(*expected))
        ));
    }
    Some((sql, params))
}

pub(crate) fn delete(table: &str, id_field: &str, id: i64) -> (String, Params) {
    let mut params = Params::default();
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        quote_ident(table),
        quote_ident(id_field),
        params.push(&Value::Int(id))
    );
    (sql, params)
}

pub(crate) fn select(table: &str, filter: &Filter, order: &OrderBy, columns: &[&str]) -> (String, Params) {
    let mut params = Params::default();
    let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let sql = format!(
        "SELECT {} FROM {}{}{}",
        columns.join(", "),
        quote_ident(table),
        where_clause(filter, &mut params),
        order_clause(order),
    );
    (sql, params)
}
