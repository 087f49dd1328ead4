use rusqlite::types::Value as SqlValue;

use listpos_core::{BulkUpdate, Comparison, Filter, FindOne, OrderBy, RowUpdate, Value};

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Bool(v) => SqlValue::Integer(*v as i64),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Bytes(v) => SqlValue::Blob(v.clone()),
    }
}

pub(crate) fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Int(v),
        SqlValue::Real(v) => Value::Text(v.to_string()),
        SqlValue::Text(v) => Value::Text(v),
        SqlValue::Blob(v) => Value::Bytes(v),
    }
}

/// ` WHERE ...` for a non-empty filter, with its parameters appended to `params`.
pub(crate) fn where_clause(filter: &Filter, params: &mut Vec<SqlValue>) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = filter
        .predicates
        .iter()
        .map(|p| match p.comparison {
            Comparison::IsNull => format!("{} IS NULL", quote_ident(&p.field)),
            cmp => {
                params.push(to_sql(&p.value));
                format!("{} {} ?", quote_ident(&p.field), cmp.sql_operator())
            }
        })
        .collect();
    format!(" WHERE {}", terms.join(" AND "))
}

fn order_clause(order: &OrderBy) -> String {
    format!(
        " ORDER BY {} {}",
        quote_ident(&order.field),
        order.direction.sql_keyword()
    )
}

pub(crate) fn find_one(query: &FindOne) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let sql = format!(
        "SELECT {} FROM {}{}{} LIMIT 1",
        quote_ident(&query.column),
        quote_ident(&query.table),
        where_clause(&query.filter, &mut params),
        order_clause(&query.order),
    );
    (sql, params)
}

pub(crate) fn bulk_update(update: &BulkUpdate) -> (String, Vec<SqlValue>) {
    let field = quote_ident(&update.shift.field);
    let mut set = format!("{field} = {field} + ?");
    if let Some(lock) = &update.shift.lock_version {
        let lock = quote_ident(lock);
        set.push_str(&format!(", {lock} = {lock} + 1"));
    }
    let mut params = vec![SqlValue::Integer(update.shift.delta)];
    let sql = format!(
        "UPDATE {} SET {set}{}",
        quote_ident(&update.table),
        where_clause(&update.filter, &mut params)
    );
    (sql, params)
}

pub(crate) fn insert(table: &str, values: &[(String, Value)]) -> (String, Vec<SqlValue>) {
    if values.is_empty() {
        return (format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)), Vec::new());
    }
    let columns: Vec<String> = values.iter().map(|(c, _)| quote_ident(c)).collect();
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote_ident(table),
        columns.join(", ")
    );
    (sql, values.iter().map(|(_, v)| to_sql(v)).collect())
}

/// `None` when the update has nothing to write.
pub(crate) fn update_row(update: &RowUpdate) -> Option<(String, Vec<SqlValue>)> {
    let mut sets: Vec<String> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    for (column, value) in &update.assignments {
        sets.push(format!("{} = ?", quote_ident(column)));
        params.push(to_sql(value));
    }
    if let Some((lock, _)) = &update.lock_version {
        let lock = quote_ident(lock);
        sets.push(format!("{lock} = {lock} + 1"));
    }
    if sets.is_empty() {
        return None;
    }

    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(&update.table),
        sets.join(", "),
        quote_ident(&update.id_field)
    );
    params.push(SqlValue::Integer(update.id.0));
    if let Some((lock, expected)) = &update.lock_version {
        sql.push_str(&format!(" AND {} = ?", quote_ident(lock)));
        params.push(SqlValue::Integer(*expected));
    }
    Some((sql, params))
}

pub(crate) fn select(
    table: &str,
    filter: &Filter,
    order: &OrderBy,
    columns: &[&str],
) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
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
