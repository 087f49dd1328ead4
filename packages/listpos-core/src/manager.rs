use tracing::{debug, trace, warn};

use crate::config::{ListConfig, ListSchema};
use crate::error::Result;
use crate::filter::{BulkUpdate, Comparison, Filter, FindOne, OrderBy, Predicate, Shift};
use crate::ids::{ListRecord, RecordId, ScopeKey};
use crate::traits::ListStore;

/// Keeps every scope of one table numbered `1..=N` as records are created, moved, transferred
/// between scopes and destroyed.
///
/// The manager holds no position state of its own. Each hook reads or shifts rows through a
/// [`ListStore`] and the host calls it from inside the transaction that saves the record:
///
/// - [`assign_position_on_create`](Self::assign_position_on_create) before inserting,
/// - [`reconcile_on_update`](Self::reconcile_on_update) after updating,
/// - [`compact_on_destroy`](Self::compact_on_destroy) after deleting.
#[derive(Clone, Debug)]
pub struct ListPositionManager {
    schema: ListSchema,
}

impl ListPositionManager {
    pub fn new(schema: ListSchema) -> Self {
        Self { schema }
    }

    /// Resolve `config` against the columns the store reports for its table.
    pub fn configure<S: ListStore>(store: &mut S, config: &ListConfig) -> Result<Self> {
        let columns = store.columns(&config.table)?;
        let schema = config.resolve(&columns)?;
        debug!(
            table = %schema.table,
            position = %schema.position_field,
            scope = ?schema.scope_fields,
            lock_version = ?schema.lock_version,
            "configured ordered list"
        );
        Ok(Self::new(schema))
    }

    pub fn schema(&self) -> &ListSchema {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.schema.table
    }

    /// Lookup of the highest-positioned row in `scope`.
    pub fn last_position_query(&self, scope: &ScopeKey) -> Result<FindOne> {
        Ok(FindOne {
            table: self.schema.table.clone(),
            filter: Filter::new().and_all(self.schema.scope_filter(scope)?),
            order: OrderBy::desc(self.schema.position_field.clone()),
            column: self.schema.position_field.clone(),
        })
    }

    /// Position for a record about to be inserted into `scope`: one past the current tail.
    ///
    /// The lookup and the later insert are two statements. Two writers creating in the same
    /// scope can compute the same position unless the caller holds a transaction in which
    /// [`ListStore::lock_scope`] (taken here) actually serializes them.
    pub fn assign_position_on_create<S: ListStore>(
        &self,
        store: &mut S,
        scope: &ScopeKey,
    ) -> Result<i64> {
        store.lock_scope(&self.schema.table, scope)?;
        let query = self.last_position_query(scope)?;
        let last = store.find_one(&query)?;
        let position = last.map_or(1, |p| p + 1);
        trace!(table = %self.schema.table, ?scope, ?last, position, "assigned position");
        Ok(position)
    }

    /// Shifts needed after `previous` was saved as `current`. Empty when neither the scope nor
    /// the position changed.
    pub fn plan_update(&self, current: &ListRecord, previous: &ListRecord) -> Result<Vec<BulkUpdate>> {
        debug_assert_eq!(current.id, previous.id, "update snapshots of different records");
        let id = current.id;

        if current.scope != previous.scope {
            let old_scope = self
                .scope_filter(&previous.scope)?
                .and(self.position(Comparison::Gt, previous.position))
                .excluding(&self.schema.id_field, id);
            let new_scope = self
                .scope_filter(&current.scope)?
                .and(self.position(Comparison::Ge, current.position))
                .excluding(&self.schema.id_field, id);
            return Ok(vec![self.shift(-1, old_scope), self.shift(1, new_scope)]);
        }

        let (new, old) = (current.position, previous.position);
        if new == old {
            return Ok(Vec::new());
        }

        let scope = self.scope_filter(&current.scope)?;
        let plan = if new < old {
            self.shift(
                1,
                scope
                    .and(self.position(Comparison::Ge, new))
                    .and(self.position(Comparison::Lt, old))
                    .excluding(&self.schema.id_field, id),
            )
        } else {
            self.shift(
                -1,
                scope
                    .and(self.position(Comparison::Le, new))
                    .and(self.position(Comparison::Ge, old))
                    .excluding(&self.schema.id_field, id),
            )
        };
        Ok(vec![plan])
    }

    /// Reconcile the other rows after a record moved within its scope or changed scope.
    ///
    /// Returns the number of rows shifted. All shifts run in one [`ListStore::atomically`]
    /// unit; an unchanged record issues no statement at all.
    pub fn reconcile_on_update<S: ListStore>(
        &self,
        store: &mut S,
        current: &ListRecord,
        previous: &ListRecord,
    ) -> Result<u64> {
        if current.position < 1 {
            warn!(
                table = %self.schema.table,
                id = %current.id,
                position = current.position,
                "record moved below the head of its list"
            );
        }
        let plan = self.plan_update(current, previous)?;
        if plan.is_empty() {
            return Ok(0);
        }
        self.apply(store, current.id, &plan)
    }

    pub fn plan_destroy(&self, record: &ListRecord) -> Result<BulkUpdate> {
        let filter = self
            .scope_filter(&record.scope)?
            .and(self.position(Comparison::Gt, record.position));
        Ok(self.shift(-1, filter))
    }

    /// Close the gap left by `record`, which has already been deleted.
    pub fn compact_on_destroy<S: ListStore>(&self, store: &mut S, record: &ListRecord) -> Result<u64> {
        let plan = [self.plan_destroy(record)?];
        self.apply(store, record.id, &plan)
    }

    fn apply<S: ListStore>(&self, store: &mut S, id: RecordId, plan: &[BulkUpdate]) -> Result<u64> {
        store.atomically(|s| {
            let mut shifted = 0;
            for update in plan {
                let rows = s.bulk_update(update)?;
                debug!(
                    table = %update.table,
                    %id,
                    delta = update.shift.delta,
                    rows,
                    "shifted positions"
                );
                shifted += rows;
            }
            Ok(shifted)
        })
    }

    fn scope_filter(&self, scope: &ScopeKey) -> Result<Filter> {
        Ok(Filter::new().and_all(self.schema.scope_filter(scope)?))
    }

    fn position(&self, comparison: Comparison, value: i64) -> Predicate {
        Predicate::new(self.schema.position_field.clone(), comparison, value)
    }

    fn shift(&self, delta: i64, filter: Filter) -> BulkUpdate {
        BulkUpdate {
            table: self.schema.table.clone(),
            shift: Shift {
                field: self.schema.position_field.clone(),
                delta,
                lock_version: self.schema.lock_version.clone(),
            },
            filter,
        }
    }
}
