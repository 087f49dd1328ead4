use listpos_core::{
    BulkUpdate, Error, Filter, FindOne, ListConfig, ListPositionManager, ListRecord, ListRegistry,
    ListStore, MemoryListStore, OrderBy, RecordId, RecordStore, Result, ScopeKey, Value,
};

fn seeded(lists: &[(i64, usize)]) -> (MemoryListStore, ListPositionManager) {
    let mut store = MemoryListStore::new();
    store.create_table("cards", "id", &["position", "board_id", "lock_version"]);
    let manager =
        ListPositionManager::configure(&mut store, &ListConfig::new("cards").scope("board")).unwrap();
    for &(board, count) in lists {
        for _ in 0..count {
            let scope = ScopeKey::new([Value::Int(board)]);
            let position = manager.assign_position_on_create(&mut store, &scope).unwrap();
            store
                .insert_row(
                    "cards",
                    "id",
                    &[
                        ("position".into(), Value::Int(position)),
                        ("board_id".into(), Value::Int(board)),
                        ("lock_version".into(), Value::Int(0)),
                    ],
                )
                .unwrap();
        }
    }
    (store, manager)
}

fn board(store: &mut MemoryListStore, board: i64) -> Vec<(i64, i64)> {
    store
        .load_rows(
            "cards",
            &Filter::new().and(listpos_core::Predicate::matches("board_id", Value::Int(board))),
            &OrderBy::asc("position"),
            &["id", "position"],
        )
        .unwrap()
        .into_iter()
        .map(|r| (r[0].as_int().unwrap(), r[1].as_int().unwrap()))
        .collect()
}

fn card(id: i64, board: i64, position: i64) -> ListRecord {
    ListRecord::new(RecordId(id), ScopeKey::new([Value::Int(board)]), position)
}

#[test]
fn create_reads_only_the_tail() {
    let (mut store, manager) = seeded(&[(1, 3)]);
    let before = store.statements();
    let position = manager
        .assign_position_on_create(&mut store, &ScopeKey::new([Value::Int(1)]))
        .unwrap();
    assert_eq!(position, 4);
    assert_eq!(store.statements() - before, 1);
}

#[test]
fn unchanged_update_issues_no_statement() {
    let (mut store, manager) = seeded(&[(1, 3)]);
    let before = store.statements();
    let shifted = manager
        .reconcile_on_update(&mut store, &card(2, 1, 2), &card(2, 1, 2))
        .unwrap();
    assert_eq!(shifted, 0);
    assert_eq!(store.statements(), before);
}

#[test]
fn destroying_the_tail_shifts_nothing() {
    let (mut store, manager) = seeded(&[(1, 3)]);
    store.delete_row("cards", "id", RecordId(3)).unwrap();
    let shifted = manager.compact_on_destroy(&mut store, &card(3, 1, 3)).unwrap();
    assert_eq!(shifted, 0);
    assert_eq!(board(&mut store, 1), vec![(1, 1), (2, 2)]);
}

#[test]
fn transfer_reports_rows_shifted_in_both_scopes() {
    let (mut store, manager) = seeded(&[(1, 3), (2, 2)]);
    // Card 2 leaves board 1 (position 2) for the head of board 2.
    let previous = card(2, 1, 2);
    let current = card(2, 2, 1);
    store
        .update_row(&listpos_core::RowUpdate {
            table: "cards".into(),
            id_field: "id".into(),
            id: RecordId(2),
            assignments: vec![
                ("position".into(), Value::Int(1)),
                ("board_id".into(), Value::Int(2)),
            ],
            lock_version: None,
        })
        .unwrap();
    let shifted = manager.reconcile_on_update(&mut store, &current, &previous).unwrap();
    assert_eq!(shifted, 3);
    assert_eq!(board(&mut store, 1), vec![(1, 1), (3, 2)]);
    assert_eq!(board(&mut store, 2), vec![(2, 1), (4, 2), (5, 3)]);
}

/// Memory store whose `n`th bulk update fails, as a dropped connection would.
struct FailingStore {
    inner: MemoryListStore,
    fail_on: usize,
    seen: usize,
}

impl ListStore for FailingStore {
    fn find_one(&mut self, query: &FindOne) -> Result<Option<i64>> {
        self.inner.find_one(query)
    }

    fn bulk_update(&mut self, update: &BulkUpdate) -> Result<u64> {
        self.seen += 1;
        if self.seen == self.fail_on {
            return Err(Error::Storage("connection reset".into()));
        }
        self.inner.bulk_update(update)
    }

    fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        self.inner.columns(table)
    }

    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let snapshot = self.inner.clone();
        let res = f(self);
        if res.is_err() {
            self.inner = snapshot;
        }
        res
    }
}

#[test]
fn failed_transfer_leaves_both_scopes_untouched() {
    let (inner, manager) = seeded(&[(1, 3), (2, 2)]);
    let mut store = FailingStore {
        inner,
        fail_on: 2,
        seen: 0,
    };
    let err = manager
        .reconcile_on_update(&mut store, &card(2, 2, 1), &card(2, 1, 2))
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(board(&mut store.inner, 1), vec![(1, 1), (2, 2), (3, 3)]);
    assert_eq!(board(&mut store.inner, 2), vec![(4, 1), (5, 2)]);
}

#[test]
fn stale_write_error_passes_through() {
    let (mut store, _) = seeded(&[(1, 2)]);
    let err = store
        .update_row(&listpos_core::RowUpdate {
            table: "cards".into(),
            id_field: "id".into(),
            id: RecordId(1),
            assignments: vec![("position".into(), Value::Int(2))],
            lock_version: Some(("lock_version".into(), 7)),
        })
        .unwrap_err();
    assert!(matches!(err, Error::StaleWrite { id: RecordId(1), .. }));
    assert!(err.to_string().contains("cards"));
}

#[test]
fn lock_version_is_decided_at_configuration() {
    let mut store = MemoryListStore::new();
    store.create_table("steps", "id", &["position", "lock_version"]);
    let config = ListConfig::new("steps").lock_version_field("lock_version");
    let manager = ListPositionManager::configure(&mut store, &config).unwrap();
    assert_eq!(manager.schema().lock_version.as_deref(), Some("lock_version"));

    let mut plain = MemoryListStore::new();
    plain.create_table("steps", "id", &["position"]);
    let manager = ListPositionManager::configure(&mut plain, &ListConfig::new("steps")).unwrap();
    let plan = manager.plan_destroy(&ListRecord::new(RecordId(1), ScopeKey::unscoped(), 1)).unwrap();
    assert_eq!(plan.shift.lock_version, None);
}

#[test]
fn unknown_scope_fails_when_configuring() {
    let mut store = MemoryListStore::new();
    store.create_table("cards", "id", &["position", "board_id"]);
    let err = ListPositionManager::configure(&mut store, &ListConfig::new("cards").scope("lane"))
        .unwrap_err();
    assert!(matches!(err, Error::ScopeResolution(_)));
}

fn save(store: &mut MemoryListStore, id: i64, board: i64, position: i64) {
    store
        .update_row(&listpos_core::RowUpdate {
            table: "cards".into(),
            id_field: "id".into(),
            id: RecordId(id),
            assignments: vec![
                ("position".into(), Value::Int(position)),
                ("board_id".into(), Value::Int(board)),
            ],
            lock_version: None,
        })
        .unwrap();
}

#[test]
fn registry_dispatches_by_table() {
    let (mut store, manager) = seeded(&[(1, 3), (2, 1)]);
    let mut registry = ListRegistry::new();
    registry.register(manager);

    let scope = ScopeKey::new([Value::Int(1)]);
    assert_eq!(registry.before_create(&mut store, "cards", &scope).unwrap(), Some(4));

    // Card 3 moves to the head of board 1.
    save(&mut store, 3, 1, 1);
    let shifted = registry
        .after_update(&mut store, "cards", &card(3, 1, 1), &card(3, 1, 3))
        .unwrap();
    assert_eq!(shifted, 2);
    assert_eq!(board(&mut store, 1), vec![(3, 1), (1, 2), (2, 3)]);

    // Card 1 leaves board 1 for the head of board 2.
    save(&mut store, 1, 2, 1);
    let shifted = registry
        .after_update(&mut store, "cards", &card(1, 2, 1), &card(1, 1, 2))
        .unwrap();
    assert_eq!(shifted, 2);
    assert_eq!(board(&mut store, 1), vec![(3, 1), (2, 2)]);
    assert_eq!(board(&mut store, 2), vec![(1, 1), (4, 2)]);

    let before = store.statements();
    let untracked = registry
        .after_update(&mut store, "tags", &card(1, 2, 2), &card(1, 2, 1))
        .unwrap();
    assert_eq!(untracked, 0);
    assert_eq!(store.statements(), before);

    store.delete_row("cards", "id", RecordId(3)).unwrap();
    let shifted = registry
        .after_destroy(&mut store, "cards", &card(3, 1, 1))
        .unwrap();
    assert_eq!(shifted, 1);
    assert_eq!(board(&mut store, 1), vec![(2, 1)]);
}

struct Tasks {
    store: MemoryListStore,
    manager: ListPositionManager,
}

impl Tasks {
    fn new() -> Self {
        let mut store = MemoryListStore::new();
        store.create_table("tasks", "task_id", &["task_id", "rank", "board_id", "lane"]);
        let config = ListConfig::new("tasks")
            .id_field("task_id")
            .position_field("rank")
            .scope("board")
            .scope("lane");
        let manager = ListPositionManager::configure(&mut store, &config).unwrap();
        Self { store, manager }
    }

    fn scope(board: i64, lane: Option<&str>) -> ScopeKey {
        ScopeKey::new([Value::Int(board), Value::from(lane)])
    }

    fn create(&mut self, board: i64, lane: Option<&str>) -> ListRecord {
        let scope = Self::scope(board, lane);
        let rank = self
            .manager
            .assign_position_on_create(&mut self.store, &scope)
            .unwrap();
        let id = self
            .store
            .insert_row(
                "tasks",
                "task_id",
                &[
                    ("rank".into(), Value::Int(rank)),
                    ("board_id".into(), Value::Int(board)),
                    ("lane".into(), Value::from(lane)),
                ],
            )
            .unwrap();
        ListRecord::new(id, scope, rank)
    }

    fn save(&mut self, previous: &ListRecord, board: i64, lane: Option<&str>, rank: i64) -> ListRecord {
        self.store
            .update_row(&listpos_core::RowUpdate {
                table: "tasks".into(),
                id_field: "task_id".into(),
                id: previous.id,
                assignments: vec![
                    ("rank".into(), Value::Int(rank)),
                    ("board_id".into(), Value::Int(board)),
                    ("lane".into(), Value::from(lane)),
                ],
                lock_version: None,
            })
            .unwrap();
        let current = ListRecord::new(previous.id, Self::scope(board, lane), rank);
        self.manager
            .reconcile_on_update(&mut self.store, &current, previous)
            .unwrap();
        current
    }

    fn destroy(&mut self, record: &ListRecord) {
        self.store.delete_row("tasks", "task_id", record.id).unwrap();
        self.manager.compact_on_destroy(&mut self.store, record).unwrap();
    }

    fn lane(&mut self, board: i64, lane: Option<&str>) -> Vec<(RecordId, i64)> {
        let filter = Filter::new()
            .and_all(self.manager.schema().scope_filter(&Self::scope(board, lane)).unwrap());
        self.store
            .load_rows("tasks", &filter, &OrderBy::asc("rank"), &["task_id", "rank"])
            .unwrap()
            .into_iter()
            .map(|r| (RecordId(r[0].as_int().unwrap()), r[1].as_int().unwrap()))
            .collect()
    }
}

#[test]
fn custom_columns_and_compound_scope() {
    let mut tasks = Tasks::new();
    assert_eq!(tasks.manager.schema().scope_fields, vec!["board_id", "lane"]);
    assert_eq!(tasks.manager.schema().lock_version, None);

    let a1 = tasks.create(1, Some("a"));
    let n1 = tasks.create(1, None);
    let a2 = tasks.create(1, Some("a"));
    let a3 = tasks.create(1, Some("a"));
    let other = tasks.create(2, Some("a"));
    assert_eq!(
        [a1.position, n1.position, a2.position, a3.position, other.position],
        [1, 1, 2, 3, 1]
    );

    let a3 = tasks.save(&a3, 1, Some("a"), 1);
    assert_eq!(tasks.lane(1, Some("a")), vec![(a3.id, 1), (a1.id, 2), (a2.id, 3)]);

    // a1 moves from lane "a" into the NULL lane of the same board.
    let a1 = tasks.save(&ListRecord::new(a1.id, a1.scope, 2), 1, None, 1);
    assert_eq!(tasks.lane(1, Some("a")), vec![(a3.id, 1), (a2.id, 2)]);
    assert_eq!(tasks.lane(1, None), vec![(a1.id, 1), (n1.id, 2)]);

    tasks.destroy(&a3);
    assert_eq!(tasks.lane(1, Some("a")), vec![(a2.id, 1)]);
    assert_eq!(tasks.lane(2, Some("a")), vec![(other.id, 1)]);
}

#[test]
fn null_positions_never_become_the_tail() {
    let mut store = MemoryListStore::new();
    store.create_table("cards", "id", &["position", "board_id"]);
    let manager =
        ListPositionManager::configure(&mut store, &ListConfig::new("cards").scope("board")).unwrap();
    for position in [Value::Int(1), Value::Null] {
        store
            .insert_row(
                "cards",
                "id",
                &[("position".into(), position), ("board_id".into(), Value::Int(1))],
            )
            .unwrap();
    }
    let position = manager
        .assign_position_on_create(&mut store, &ScopeKey::new([Value::Int(1)]))
        .unwrap();
    assert_eq!(position, 2);
}
