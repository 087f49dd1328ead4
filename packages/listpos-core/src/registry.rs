use std::collections::HashMap;

use crate::error::Result;
use crate::ids::{ListRecord, ScopeKey};
use crate::manager::ListPositionManager;
use crate::traits::ListStore;

/// Tables that opted into ordered-list behavior, keyed by table name.
///
/// Hosts dispatch their save and delete events here. A table that was never registered has no
/// position hooks, so events for it fall through untouched.
#[derive(Clone, Debug, Default)]
pub struct ListRegistry {
    managers: HashMap<String, ListPositionManager>,
}

impl ListRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the manager previously registered for the same table, if any.
    pub fn register(&mut self, manager: ListPositionManager) -> Option<ListPositionManager> {
        self.managers.insert(manager.table().to_string(), manager)
    }

    pub fn get(&self, table: &str) -> Option<&ListPositionManager> {
        self.managers.get(table)
    }

    pub fn before_create<S: ListStore>(
        &self,
        store: &mut S,
        table: &str,
        scope: &ScopeKey,
    ) -> Result<Option<i64>> {
        match self.get(table) {
            Some(m) => m.assign_position_on_create(store, scope).map(Some),
            None => Ok(None),
        }
    }

    pub fn after_update<S: ListStore>(
        &self,
        store: &mut S,
        table: &str,
        current: &ListRecord,
        previous: &ListRecord,
    ) -> Result<u64> {
        match self.get(table) {
            Some(m) => m.reconcile_on_update(store, current, previous),
            None => Ok(0),
        }
    }

    pub fn after_destroy<S: ListStore>(
        &self,
        store: &mut S,
        table: &str,
        record: &ListRecord,
    ) -> Result<u64> {
        match self.get(table) {
            Some(m) => m.compact_on_destroy(store, record),
            None => Ok(0),
        }
    }
}
