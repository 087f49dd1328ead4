#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::Predicate;
use crate::ids::{ScopeKey, Value};

pub const DEFAULT_POSITION_FIELD: &str = "position";
pub const DEFAULT_ID_FIELD: &str = "id";
pub const DEFAULT_LOCK_VERSION_FIELD: &str = "lock_version";
const SCOPE_ID_SUFFIX: &str = "_id";

/// Options a host supplies when enabling ordered-list behavior on a table.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct ListConfig {
    pub table: String,
    pub position_field: String,
    /// Bare column names, or association names resolved to `<name>_id`.
    pub scope_fields: Vec<String>,
    pub id_field: String,
    /// `None` detects a `lock_version` column; `Some` requires the named column to exist.
    pub lock_version_field: Option<String>,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            position_field: DEFAULT_POSITION_FIELD.to_string(),
            scope_fields: Vec::new(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            lock_version_field: None,
        }
    }
}

impl ListConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn position_field(mut self, field: impl Into<String>) -> Self {
        self.position_field = field.into();
        self
    }

    pub fn scope(mut self, field: impl Into<String>) -> Self {
        self.scope_fields.push(field.into());
        self
    }

    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn lock_version_field(mut self, field: impl Into<String>) -> Self {
        self.lock_version_field = Some(field.into());
        self
    }

    /// Resolve every configured name against the table's actual columns.
    ///
    /// All column checks happen here so that a misconfigured table fails once at setup rather
    /// than on the first save.
    pub fn resolve<S: AsRef<str>>(&self, columns: &[S]) -> Result<ListSchema> {
        let has = |name: &str| columns.iter().any(|c| c.as_ref() == name);

        if self.table.is_empty() {
            return Err(Error::ScopeResolution("list table name is empty".into()));
        }
        for (what, field) in [("position", &self.position_field), ("id", &self.id_field)] {
            if !has(field.as_str()) {
                return Err(Error::ScopeResolution(format!(
                    "{what} column `{field}` does not exist on `{}`",
                    self.table
                )));
            }
        }

        let mut scope_fields = Vec::with_capacity(self.scope_fields.len());
        for scope in &self.scope_fields {
            let column = if has(scope.as_str()) {
                scope.clone()
            } else {
                let suffixed = format!("{scope}{SCOPE_ID_SUFFIX}");
                if !has(suffixed.as_str()) {
                    return Err(Error::ScopeResolution(format!(
                        "scope `{scope}` matches neither `{scope}` nor `{suffixed}` on `{}`",
                        self.table
                    )));
                }
                suffixed
            };
            if scope_fields.contains(&column) {
                return Err(Error::ScopeResolution(format!(
                    "scope column `{column}` is configured twice on `{}`",
                    self.table
                )));
            }
            scope_fields.push(column);
        }

        let lock_version = match &self.lock_version_field {
            Some(field) if has(field.as_str()) => Some(field.clone()),
            Some(field) => {
                return Err(Error::ScopeResolution(format!(
                    "lock version column `{field}` does not exist on `{}`",
                    self.table
                )))
            }
            None => has(DEFAULT_LOCK_VERSION_FIELD).then(|| DEFAULT_LOCK_VERSION_FIELD.to_string()),
        };

        Ok(ListSchema {
            table: self.table.clone(),
            position_field: self.position_field.clone(),
            id_field: self.id_field.clone(),
            scope_fields,
            lock_version,
        })
    }
}

/// A [`ListConfig`] whose column names were checked against the table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListSchema {
    pub table: String,
    pub position_field: String,
    pub id_field: String,
    pub scope_fields: Vec<String>,
    pub lock_version: Option<String>,
}

impl ListSchema {
    /// Build a record's scope key by looking up each resolved scope column.
    pub fn scope_key(&self, mut lookup: impl FnMut(&str) -> Value) -> ScopeKey {
        ScopeKey::new(self.scope_fields.iter().map(|f| lookup(f.as_str())))
    }

    pub fn scope_filter(&self, key: &ScopeKey) -> Result<Vec<Predicate>> {
        if key.len() != self.scope_fields.len() {
            return Err(Error::ScopeResolution(format!(
                "scope key has {} values but `{}` is scoped by {:?}",
                key.len(),
                self.table,
                self.scope_fields
            )));
        }
        Ok(self
            .scope_fields
            .iter()
            .zip(key.values())
            .map(|(field, value)| Predicate::matches(field.clone(), value.clone()))
            .collect())
    }
}
