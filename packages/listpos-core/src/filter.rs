//! Structured predicates and statements exchanged with a [`crate::ListStore`].
//!
//! Nothing here renders SQL. Backends translate these into parameterized statements, so values
//! never travel as text and NULL handling is decided once, in [`Predicate::matches`].

use std::cmp::Ordering;

use crate::ids::{RecordId, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
}

impl Comparison {
    pub fn sql_operator(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::IsNull => "IS NULL",
        }
    }
}

/// `field <comparison> value`. For [`Comparison::IsNull`] the value is ignored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub comparison: Comparison,
    pub value: Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, comparison: Comparison, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            comparison,
            value: value.into(),
        }
    }

    /// Scope-style equality: NULL matches only NULL.
    pub fn matches(field: impl Into<String>, value: Value) -> Self {
        if value.is_null() {
            Self::new(field, Comparison::IsNull, Value::Null)
        } else {
            Self::new(field, Comparison::Eq, value)
        }
    }

    /// Evaluates the predicate against a stored value with SQL semantics: any comparison
    /// involving NULL (other than `IS NULL`) is false, and so is comparing mismatched types.
    pub fn eval(&self, stored: &Value) -> bool {
        if self.comparison == Comparison::IsNull {
            return stored.is_null();
        }
        let Some(ord) = compare_values(stored, &self.value) else {
            return false;
        };
        match self.comparison {
            Comparison::Eq => ord == Ordering::Equal,
            Comparison::Ne => ord != Ordering::Equal,
            Comparison::Lt => ord == Ordering::Less,
            Comparison::Le => ord != Ordering::Greater,
            Comparison::Gt => ord == Ordering::Greater,
            Comparison::Ge => ord != Ordering::Less,
            Comparison::IsNull => unreachable!("handled above"),
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Conjunction of predicates. The empty filter matches every row.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Filter {
    pub predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn and_all(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn excluding(self, id_field: &str, id: RecordId) -> Self {
        self.and(Predicate::new(id_field, Comparison::Ne, id))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// `lookup` returns the stored value of a column, or `None` when the row lacks it.
    pub fn eval<'a>(&self, lookup: impl Fn(&str) -> Option<&'a Value>) -> bool {
        self.predicates.iter().all(|p| match lookup(&p.field) {
            Some(v) => p.eval(v),
            None => p.eval(&Value::Null),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn sql_keyword(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// Set expression of a bulk update: `field = field + delta`, optionally bumping a lock column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Shift {
    pub field: String,
    pub delta: i64,
    pub lock_version: Option<String>,
}

/// Read the integer `column` of the first row matching `filter` under `order`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FindOne {
    pub table: String,
    pub filter: Filter,
    pub order: OrderBy,
    pub column: String,
}

/// Apply `shift` to every row of `table` matching `filter`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BulkUpdate {
    pub table: String,
    pub shift: Shift,
    pub filter: Filter,
}

/// Host-side single-row write, optionally guarded by an optimistic-lock column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RowUpdate {
    pub table: String,
    pub id_field: String,
    pub id: RecordId,
    pub assignments: Vec<(String, Value)>,
    /// `(column, expected)`: the write only applies while the stored version equals `expected`,
    /// and increments it.
    pub lock_version: Option<(String, i64)>,
}
