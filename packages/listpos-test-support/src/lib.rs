//! Backend conformance suite for listpos stores.
//!
//! Every backend creates a `todos`-shaped table (see [`TODO_COLUMNS`]) and hands its store to a
//! [`Host`], which plays the application: it saves rows through [`RecordStore`] and calls the
//! position hooks in the same atomic unit. The scenario functions then check the ordering
//! invariants against whatever the store persisted.

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::test_runner::{TestCaseError, TestRunner};

use listpos_core::{
    Comparison, Error, Filter, ListConfig, ListPositionManager, ListRecord, ListStore, OrderBy,
    Predicate, RecordId, RecordStore, Result, RowUpdate, ScopeKey, Value,
};

/// Columns of the conformance table: integer `id` primary key, integer `position`, nullable
/// integer `todo_list_id`, and integer `lock_version` (not null, default 0).
pub const TODO_COLUMNS: &[&str] = &["id", "position", "todo_list_id", "lock_version"];
pub const LIST_COLUMN: &str = "todo_list_id";

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("listpos_core=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

pub struct Host<S> {
    pub store: S,
    pub manager: ListPositionManager,
}

impl<S: ListStore + RecordStore> Host<S> {
    /// Configure `table` as a list scoped by `todo_list`.
    pub fn new(mut store: S, table: &str) -> Result<Self> {
        init_tracing();
        let config = ListConfig::new(table).scope("todo_list");
        let manager = ListPositionManager::configure(&mut store, &config)?;
        Ok(Self { store, manager })
    }

    fn table(&self) -> &str {
        self.manager.table()
    }

    pub fn create(&mut self, list: Option<i64>) -> Result<ListRecord> {
        let manager = &self.manager;
        let scope = ScopeKey::new([Value::from(list)]);
        self.store.atomically(|s| {
            let position = manager.assign_position_on_create(s, &scope)?;
            let id = s.insert_row(
                manager.table(),
                "id",
                &[
                    ("position".to_string(), Value::Int(position)),
                    (LIST_COLUMN.to_string(), Value::from(list)),
                    ("lock_version".to_string(), Value::Int(0)),
                ],
            )?;
            Ok(ListRecord::new(id, scope.clone(), position))
        })
    }

    /// Current `(record, lock_version)` of a row.
    pub fn load(&mut self, id: RecordId) -> Result<(ListRecord, i64)> {
        let schema = self.manager.schema();
        let filter = Filter::new().and(Predicate::new(schema.id_field.clone(), Comparison::Eq, id));
        let mut columns = vec![schema.position_field.as_str(), "lock_version"];
        columns.extend(schema.scope_fields.iter().map(String::as_str));
        let rows = self.store.load_rows(
            &schema.table,
            &filter,
            &OrderBy::asc(schema.id_field.clone()),
            &columns,
        )?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::Storage(format!("record {id} not found")))?;
        let position = row[0].as_int().ok_or_else(|| Error::Storage("position is NULL".into()))?;
        let version = row[1].as_int().unwrap_or_default();
        let scope = schema.scope_key(|column| {
            columns
                .iter()
                .position(|c| *c == column)
                .map_or(Value::Null, |i| row[i].clone())
        });
        Ok((ListRecord::new(id, scope, position), version))
    }

    /// Save `id` into `list` at `position`, guarded by the version read just before.
    pub fn save(&mut self, id: RecordId, list: Option<i64>, position: i64) -> Result<ListRecord> {
        let (_, version) = self.load(id)?;
        self.save_with_version(id, list, position, version)
    }

    /// Save with an explicit expected lock version, as a host holding an older read would.
    pub fn save_with_version(
        &mut self,
        id: RecordId,
        list: Option<i64>,
        position: i64,
        expected_version: i64,
    ) -> Result<ListRecord> {
        let (previous, _) = self.load(id)?;
        let current = ListRecord::new(id, ScopeKey::new([Value::from(list)]), position);
        let update = RowUpdate {
            table: self.table().to_string(),
            id_field: "id".to_string(),
            id,
            assignments: vec![
                ("position".to_string(), Value::Int(position)),
                (LIST_COLUMN.to_string(), Value::from(list)),
            ],
            lock_version: Some(("lock_version".to_string(), expected_version)),
        };
        let manager = &self.manager;
        self.store.atomically(|s| {
            s.update_row(&update)?;
            manager.reconcile_on_update(s, &current, &previous)?;
            Ok(())
        })?;
        Ok(current)
    }

    pub fn move_to(&mut self, id: RecordId, position: i64) -> Result<ListRecord> {
        let (record, _) = self.load(id)?;
        let list = record.scope.values()[0].as_int();
        self.save(id, list, position)
    }

    pub fn destroy(&mut self, id: RecordId) -> Result<()> {
        let (record, _) = self.load(id)?;
        let manager = &self.manager;
        self.store.atomically(|s| {
            s.delete_row(manager.table(), "id", id)?;
            manager.compact_on_destroy(s, &record)?;
            Ok(())
        })
    }

    /// Ids of `list` in position order.
    pub fn order(&mut self, list: Option<i64>) -> Result<Vec<RecordId>> {
        Ok(self.positions(list)?.into_iter().map(|(id, _)| id).collect())
    }

    pub fn positions(&mut self, list: Option<i64>) -> Result<Vec<(RecordId, i64)>> {
        let filter = Filter::new().and(Predicate::matches(LIST_COLUMN, Value::from(list)));
        let rows = self.store.load_rows(
            self.manager.table(),
            &filter,
            &OrderBy::asc("position"),
            &["id", "position"],
        )?;
        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    RecordId(r[0].as_int().unwrap_or_default()),
                    r[1].as_int().unwrap_or_default(),
                )
            })
            .collect())
    }

    pub fn assert_contiguous(&mut self, list: Option<i64>) {
        let positions: Vec<i64> = self
            .positions(list)
            .unwrap()
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        let expected: Vec<i64> = (1..=positions.len() as i64).collect();
        assert_eq!(positions, expected, "scope {list:?} is not numbered 1..=N");
    }
}

/// Empty scope, two creates: positions 1 then 2.
pub fn sequential_creates_append<S: ListStore + RecordStore>(host: &mut Host<S>) {
    let r1 = host.create(Some(1)).unwrap();
    assert_eq!(r1.position, 1);
    let r2 = host.create(Some(1)).unwrap();
    assert_eq!(r2.position, 2);
    let other = host.create(Some(2)).unwrap();
    assert_eq!(other.position, 1, "a fresh scope starts at 1");
    let unscoped = host.create(None).unwrap();
    assert_eq!(unscoped.position, 1, "the NULL scope is its own list");
}

/// 1,2,3,4: destroying 2 leaves the old 1,3,4 at 1,2,3.
pub fn destroy_compacts_tail<S: ListStore + RecordStore>(host: &mut Host<S>) {
    let ids: Vec<RecordId> = (0..4).map(|_| host.create(Some(1)).unwrap().id).collect();
    host.destroy(ids[1]).unwrap();
    assert_eq!(
        host.positions(Some(1)).unwrap(),
        vec![(ids[0], 1), (ids[2], 2), (ids[3], 3)]
    );

    host.destroy(ids[3]).unwrap();
    assert_eq!(host.order(Some(1)).unwrap(), vec![ids[0], ids[2]]);
    host.assert_contiguous(Some(1));
}

/// 1..5: moving 4 to 2 gives 1, moved, orig2, orig3, 5.
pub fn move_to_earlier_position<S: ListStore + RecordStore>(host: &mut Host<S>) {
    let ids: Vec<RecordId> = (0..5).map(|_| host.create(Some(1)).unwrap().id).collect();
    host.move_to(ids[3], 2).unwrap();
    assert_eq!(
        host.order(Some(1)).unwrap(),
        vec![ids[0], ids[3], ids[1], ids[2], ids[4]]
    );
    host.assert_contiguous(Some(1));
}

pub fn move_to_later_position<S: ListStore + RecordStore>(host: &mut Host<S>) {
    let ids: Vec<RecordId> = (0..5).map(|_| host.create(Some(1)).unwrap().id).collect();
    host.move_to(ids[1], 4).unwrap();
    assert_eq!(
        host.order(Some(1)).unwrap(),
        vec![ids[0], ids[2], ids[3], ids[1], ids[4]]
    );
    host.move_to(ids[0], 5).unwrap();
    assert_eq!(
        host.order(Some(1)).unwrap(),
        vec![ids[2], ids[3], ids[1], ids[4], ids[0]]
    );
    host.assert_contiguous(Some(1));
}

/// Saving without changing position or scope shifts nothing and bumps no other version.
pub fn unchanged_save_is_a_no_op<S: ListStore + RecordStore>(host: &mut Host<S>) {
    let ids: Vec<RecordId> = (0..3).map(|_| host.create(Some(1)).unwrap().id).collect();
    let before = host.positions(Some(1)).unwrap();
    host.move_to(ids[1], 2).unwrap();
    assert_eq!(host.positions(Some(1)).unwrap(), before);
    for id in [ids[0], ids[2]] {
        assert_eq!(host.load(id).unwrap().1, 0, "untouched rows keep their version");
    }
}

/// X (2 of 3) moves to Y at 1 of 2: X compacts, Y opens a slot at the head.
pub fn transfer_between_scopes<S: ListStore + RecordStore>(host: &mut Host<S>) {
    let x: Vec<RecordId> = (0..3).map(|_| host.create(Some(10)).unwrap().id).collect();
    let y: Vec<RecordId> = (0..2).map(|_| host.create(Some(20)).unwrap().id).collect();

    host.save(x[1], Some(20), 1).unwrap();

    assert_eq!(host.positions(Some(10)).unwrap(), vec![(x[0], 1), (x[2], 2)]);
    assert_eq!(
        host.positions(Some(20)).unwrap(),
        vec![(x[1], 1), (y[0], 2), (y[1], 3)]
    );
}

/// Moving into and out of the NULL scope treats NULL as a scope value of its own.
pub fn transfer_through_null_scope<S: ListStore + RecordStore>(host: &mut Host<S>) {
    let a: Vec<RecordId> = (0..2).map(|_| host.create(Some(1)).unwrap().id).collect();
    let n: Vec<RecordId> = (0..2).map(|_| host.create(None).unwrap().id).collect();

    host.save(a[0], None, 2).unwrap();
    assert_eq!(host.order(None).unwrap(), vec![n[0], a[0], n[1]]);
    assert_eq!(host.positions(Some(1)).unwrap(), vec![(a[1], 1)]);

    host.save(n[1], Some(1), 2).unwrap();
    assert_eq!(host.order(Some(1)).unwrap(), vec![a[1], n[1]]);
    assert_eq!(host.order(None).unwrap(), vec![n[0], a[0]]);
    host.assert_contiguous(None);
    host.assert_contiguous(Some(1));
}

/// Work in one scope never touches rows of another.
pub fn scopes_are_isolated<S: ListStore + RecordStore>(host: &mut Host<S>) {
    let a: Vec<RecordId> = (0..4).map(|_| host.create(Some(1)).unwrap().id).collect();
    let _b: Vec<RecordId> = (0..4).map(|_| host.create(Some(2)).unwrap().id).collect();
    let _n: Vec<RecordId> = (0..2).map(|_| host.create(None).unwrap().id).collect();
    let untouched_b = host.positions(Some(2)).unwrap();
    let untouched_n = host.positions(None).unwrap();

    host.move_to(a[3], 1).unwrap();
    host.move_to(a[0], 4).unwrap();
    host.destroy(a[1]).unwrap();
    host.create(Some(1)).unwrap();

    assert_eq!(host.positions(Some(2)).unwrap(), untouched_b);
    assert_eq!(host.positions(None).unwrap(), untouched_n);
    host.assert_contiguous(Some(1));
}

/// Shifts bump `lock_version`, so a host saving from an older read is rejected.
pub fn shifts_invalidate_stale_reads<S: ListStore + RecordStore>(host: &mut Host<S>) {
    let ids: Vec<RecordId> = (0..3).map(|_| host.create(Some(1)).unwrap().id).collect();
    let (_, stale_version) = host.load(ids[2]).unwrap();

    host.destroy(ids[0]).unwrap();
    let (shifted, version) = host.load(ids[2]).unwrap();
    assert_eq!(shifted.position, 2);
    assert_eq!(version, stale_version + 1);

    let err = host
        .save_with_version(ids[2], Some(1), 1, stale_version)
        .unwrap_err();
    assert!(
        matches!(err, Error::StaleWrite { id, .. } if id == ids[2]),
        "unexpected error: {err:?}"
    );
    assert_eq!(
        host.positions(Some(1)).unwrap(),
        vec![(ids[1], 1), (ids[2], 2)],
        "a rejected save leaves the list as it was"
    );
}

const WALK_SCOPES: [Option<i64>; 3] = [Some(1), Some(2), None];

/// One step of a random walk. Indices are reduced modulo the current list length when the step
/// is replayed, so every generated step is applicable.
#[derive(Clone, Debug)]
pub enum WalkStep {
    Create { scope: usize },
    Move { scope: usize, from: usize, to: usize },
    Transfer { scope: usize, from: usize, target: usize, to: usize },
    Destroy { scope: usize, at: usize },
}

pub fn walk_step() -> impl Strategy<Value = WalkStep> {
    let scope = 0..WALK_SCOPES.len();
    prop_oneof![
        scope.clone().prop_map(|scope| WalkStep::Create { scope }),
        (scope.clone(), 0usize..16, 0usize..16)
            .prop_map(|(scope, from, to)| WalkStep::Move { scope, from, to }),
        (scope.clone(), 0usize..16, scope.clone(), 0usize..16).prop_map(
            |(scope, from, target, to)| WalkStep::Transfer {
                scope,
                from,
                target,
                to,
            }
        ),
        (scope, 0usize..16).prop_map(|(scope, at)| WalkStep::Destroy { scope, at }),
    ]
}

fn fail(e: Error) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

/// Replay `steps` on `host`, comparing every scope with a reference list after each step.
pub fn replay_walk<S: ListStore + RecordStore>(
    host: &mut Host<S>,
    steps: &[WalkStep],
) -> std::result::Result<(), TestCaseError> {
    let mut model: BTreeMap<Option<i64>, Vec<RecordId>> = BTreeMap::new();

    for step in steps {
        match *step {
            WalkStep::Create { scope } => {
                let list = WALK_SCOPES[scope];
                let r = host.create(list).map_err(fail)?;
                model.entry(list).or_default().push(r.id);
            }
            WalkStep::Move { scope, from, to } => {
                let list = model.entry(WALK_SCOPES[scope]).or_default();
                if list.is_empty() {
                    continue;
                }
                let id = list.remove(from % list.len());
                let to = to % (list.len() + 1);
                list.insert(to, id);
                host.move_to(id, to as i64 + 1).map_err(fail)?;
            }
            WalkStep::Transfer {
                scope,
                from,
                target,
                to,
            } => {
                let source = model.entry(WALK_SCOPES[scope]).or_default();
                if source.is_empty() {
                    continue;
                }
                let id = source.remove(from % source.len());
                let dest = model.entry(WALK_SCOPES[target]).or_default();
                let to = to % (dest.len() + 1);
                dest.insert(to, id);
                host.save(id, WALK_SCOPES[target], to as i64 + 1).map_err(fail)?;
            }
            WalkStep::Destroy { scope, at } => {
                let list = model.entry(WALK_SCOPES[scope]).or_default();
                if list.is_empty() {
                    continue;
                }
                let id = list.remove(at % list.len());
                host.destroy(id).map_err(fail)?;
            }
        }

        for list in WALK_SCOPES {
            let expected = model.get(&list).cloned().unwrap_or_default();
            prop_assert_eq!(host.order(list).map_err(fail)?, expected, "scope {:?} diverged", list);
            let positions: Vec<i64> = host
                .positions(list)
                .map_err(fail)?
                .into_iter()
                .map(|(_, p)| p)
                .collect();
            let contiguous: Vec<i64> = (1..=positions.len() as i64).collect();
            prop_assert_eq!(positions, contiguous, "scope {:?} is not numbered 1..=N", list);
        }
    }
    Ok(())
}

/// Run `cases` random walks, each on a fresh host from `fresh`, shrinking any failure to a
/// minimal step sequence. A factory returning `None` skips the case.
pub fn random_walks_match_reference<S, F>(fresh: F, cases: u32)
where
    S: ListStore + RecordStore,
    F: Fn() -> Option<Host<S>>,
{
    let config = ProptestConfig {
        cases,
        failure_persistence: None,
        ..ProptestConfig::default()
    };
    let mut runner = TestRunner::new(config);
    let result = runner.run(&prop::collection::vec(walk_step(), 1..40), |steps| {
        let Some(mut host) = fresh() else {
            return Ok(());
        };
        replay_walk(&mut host, &steps)
    });
    if let Err(e) = result {
        panic!("random walk diverged from the reference lists: {e}");
    }
}

/// Expands to one `#[test]` per conformance scenario. `$host` is a path to a function returning
/// `Option<Host<_>>` over an empty table; `None` skips the test (e.g. no database configured).
#[macro_export]
macro_rules! conformance_tests {
    ($host:path) => {
        #[test]
        fn sequential_creates_append() {
            let Some(mut host) = $host() else {
                return;
            };
            $crate::sequential_creates_append(&mut host);
        }

        #[test]
        fn destroy_compacts_tail() {
            let Some(mut host) = $host() else {
                return;
            };
            $crate::destroy_compacts_tail(&mut host);
        }

        #[test]
        fn move_to_earlier_position() {
            let Some(mut host) = $host() else {
                return;
            };
            $crate::move_to_earlier_position(&mut host);
        }

        #[test]
        fn move_to_later_position() {
            let Some(mut host) = $host() else {
                return;
            };
            $crate::move_to_later_position(&mut host);
        }

        #[test]
        fn unchanged_save_is_a_no_op() {
            let Some(mut host) = $host() else {
                return;
            };
            $crate::unchanged_save_is_a_no_op(&mut host);
        }

        #[test]
        fn transfer_between_scopes() {
            let Some(mut host) = $host() else {
                return;
            };
            $crate::transfer_between_scopes(&mut host);
        }

        #[test]
        fn transfer_through_null_scope() {
            let Some(mut host) = $host() else {
                return;
            };
            $crate::transfer_through_null_scope(&mut host);
        }

        #[test]
        fn scopes_are_isolated() {
            let Some(mut host) = $host() else {
                return;
            };
            $crate::scopes_are_isolated(&mut host);
        }

        #[test]
        fn shifts_invalidate_stale_reads() {
            let Some(mut host) = $host() else {
                return;
            };
            $crate::shifts_invalidate_stale_reads(&mut host);
        }

        #[test]
        fn random_walks_match_reference() {
            $crate::random_walks_match_reference($host, 32);
        }
    };
}
