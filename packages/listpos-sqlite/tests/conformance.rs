use listpos_core::{
    Error, Filter, ListConfig, ListPositionManager, ListRecord, ListStore, OrderBy, RecordStore,
    RowUpdate, ScopeKey, Value,
};
use listpos_sqlite::SqliteListStore;
use listpos_test_support::{conformance_tests, Host};

const TODOS: &str = "CREATE TABLE todos (
    id INTEGER PRIMARY KEY,
    position INTEGER NOT NULL,
    todo_list_id INTEGER,
    lock_version INTEGER NOT NULL DEFAULT 0
);";

fn host_for(store: SqliteListStore) -> Host<SqliteListStore> {
    store.connection().execute_batch(TODOS).unwrap();
    let host = Host::new(store, "todos").unwrap();
    host.store.ensure_position_index(host.manager.schema()).unwrap();
    host
}

fn sqlite_host() -> Option<Host<SqliteListStore>> {
    Some(host_for(SqliteListStore::new_in_memory().unwrap()))
}

conformance_tests!(sqlite_host);

#[test]
fn positions_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("todos.db");
    let path = path.to_str().unwrap();
    {
        let mut host = host_for(SqliteListStore::new(path).unwrap());
        let a = host.create(Some(1)).unwrap();
        host.create(Some(1)).unwrap();
        host.create(Some(1)).unwrap();
        host.move_to(a.id, 3).unwrap();
    }

    let store = SqliteListStore::new(path).unwrap();
    let mut host = Host::new(store, "todos").unwrap();
    host.assert_contiguous(Some(1));
    let order: Vec<i64> = host.order(Some(1)).unwrap().into_iter().map(|id| id.0).collect();
    assert_eq!(order, vec![2, 3, 1]);
    assert_eq!(host.create(Some(1)).unwrap().position, 4);
}

#[test]
fn failed_save_rolls_back_the_row_and_the_shift() {
    let mut host = sqlite_host().unwrap();
    let a = host.create(Some(1)).unwrap();
    let b = host.create(Some(1)).unwrap();
    host.create(Some(1)).unwrap();

    // Bump `a` behind the host's back so its guarded save is stale.
    host.store
        .connection()
        .execute("UPDATE todos SET lock_version = lock_version + 1 WHERE id = ?1", [a.id.0])
        .unwrap();
    let err = host.save_with_version(a.id, Some(1), 3, 0).unwrap_err();
    assert!(matches!(err, Error::StaleWrite { .. }));

    let positions: Vec<i64> = host
        .positions(Some(1))
        .unwrap()
        .into_iter()
        .map(|(_, p)| p)
        .collect();
    assert_eq!(positions, vec![1, 2, 3]);
    assert_eq!(host.order(Some(1)).unwrap()[1], b.id);
}

#[test]
fn hooks_join_an_open_host_transaction() {
    let mut host = sqlite_host().unwrap();
    host.create(Some(1)).unwrap();
    host.store.connection().execute_batch("BEGIN").unwrap();
    let b = host.create(Some(1)).unwrap();
    assert_eq!(b.position, 2);
    host.store.connection().execute_batch("ROLLBACK").unwrap();

    assert_eq!(host.positions(Some(1)).unwrap().len(), 1);
    assert!(!host.store.delete_row("todos", "id", b.id).unwrap());
}

#[test]
fn null_positions_never_become_the_tail() {
    let mut store = SqliteListStore::new_in_memory().unwrap();
    store
        .connection()
        .execute_batch(
            "CREATE TABLE cards (id INTEGER PRIMARY KEY, position INTEGER, board_id INTEGER);
             INSERT INTO cards (position, board_id) VALUES (1, 1), (NULL, 1);",
        )
        .unwrap();
    let manager =
        ListPositionManager::configure(&mut store, &ListConfig::new("cards").scope("board")).unwrap();
    let position = manager
        .assign_position_on_create(&mut store, &ScopeKey::new([Value::Int(1)]))
        .unwrap();
    assert_eq!(position, 2);
}

fn lane_ranks(store: &mut SqliteListStore, manager: &ListPositionManager, scope: &ScopeKey) -> Vec<(i64, i64)> {
    let filter = Filter::new().and_all(manager.schema().scope_filter(scope).unwrap());
    store
        .load_rows("tasks", &filter, &OrderBy::asc("rank"), &["task_id", "rank"])
        .unwrap()
        .into_iter()
        .map(|r| (r[0].as_int().unwrap(), r[1].as_int().unwrap()))
        .collect()
}

#[test]
fn rank_column_with_compound_scope() {
    let mut store = SqliteListStore::new_in_memory().unwrap();
    store
        .connection()
        .execute_batch(
            "CREATE TABLE tasks (
                task_id INTEGER PRIMARY KEY,
                rank INTEGER NOT NULL,
                board_id INTEGER NOT NULL,
                lane TEXT
            );",
        )
        .unwrap();
    let config = ListConfig::new("tasks")
        .id_field("task_id")
        .position_field("rank")
        .scope("board")
        .scope("lane");
    let manager = ListPositionManager::configure(&mut store, &config).unwrap();
    store.ensure_position_index(manager.schema()).unwrap();

    let lane_a = ScopeKey::new([Value::Int(1), Value::from("a")]);
    let no_lane = ScopeKey::new([Value::Int(1), Value::Null]);
    let create = |store: &mut SqliteListStore, scope: &ScopeKey| {
        store
            .atomically(|s| {
                let rank = manager.assign_position_on_create(s, scope)?;
                let values = scope.values();
                let id = s.insert_row(
                    "tasks",
                    "task_id",
                    &[
                        ("rank".into(), Value::Int(rank)),
                        ("board_id".into(), values[0].clone()),
                        ("lane".into(), values[1].clone()),
                    ],
                )?;
                Ok(ListRecord::new(id, scope.clone(), rank))
            })
            .unwrap()
    };

    let first = create(&mut store, &lane_a);
    let unlaned = create(&mut store, &no_lane);
    let second = create(&mut store, &lane_a);
    assert_eq!((first.position, unlaned.position, second.position), (1, 1, 2));

    // The second task moves to the head of the NULL lane.
    store
        .update_row(&RowUpdate {
            table: "tasks".into(),
            id_field: "task_id".into(),
            id: second.id,
            assignments: vec![("rank".into(), Value::Int(1)), ("lane".into(), Value::Null)],
            lock_version: None,
        })
        .unwrap();
    let moved = ListRecord::new(second.id, no_lane.clone(), 1);
    manager.reconcile_on_update(&mut store, &moved, &second).unwrap();
    assert_eq!(
        lane_ranks(&mut store, &manager, &no_lane),
        vec![(second.id.0, 1), (unlaned.id.0, 2)]
    );

    store.delete_row("tasks", "task_id", moved.id).unwrap();
    manager.compact_on_destroy(&mut store, &moved).unwrap();
    assert_eq!(lane_ranks(&mut store, &manager, &no_lane), vec![(unlaned.id.0, 1)]);
    assert_eq!(lane_ranks(&mut store, &manager, &lane_a), vec![(first.id.0, 1)]);
}
