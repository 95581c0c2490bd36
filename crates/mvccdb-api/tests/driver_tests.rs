//! Driver-level tests of the prepare/exec/query surface against the
//! concrete end-to-end scenarios: autocommit insert+select, read-committed
//! vs. repeatable-read visibility, write conflicts, lock timeouts, and
//! rollback erasure.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mvccdb_api::{Connection, RowStep};
use mvccdb_core::table::Column;
use mvccdb_core::{Engine, EngineConfig, IsolationLevel, Value};

fn users_engine() -> Engine {
    let engine = Engine::new();
    let conn = Connection::open(&engine);
    conn.create_table(
        "users",
        vec![
            Column::auto_increment("id"),
            Column::new("name"),
            Column::new("age"),
        ],
    )
    .unwrap();
    engine
}

fn fetch_all_names(conn: &Connection) -> Vec<String> {
    let select = conn.prepare("SELECT name FROM users").unwrap();
    let mut rows = select.query(&[]).unwrap();
    let mut row = Vec::new();
    let mut out = Vec::new();
    while rows.next(&mut row) == RowStep::Ok {
        out.push(row[0].to_string());
    }
    out
}

#[test]
fn scenario_1_autocommit_insert_and_select() {
    let engine = users_engine();
    let conn = Connection::open(&engine);

    let insert = conn.prepare("INSERT INTO users(name,age) VALUES (?, ?)").unwrap();
    let result = insert
        .exec(&[Value::Text("Alice".to_string()), Value::Integer(30)])
        .unwrap();
    assert_eq!(result.last_insert_id, 1);
    assert_eq!(result.rows_affected, 1);

    let select = conn.prepare("SELECT name,age FROM users WHERE id=?").unwrap();
    let mut rows = select.query(&[Value::Integer(1)]).unwrap();
    let mut row = Vec::new();
    assert_eq!(rows.next(&mut row), RowStep::Ok);
    assert_eq!(row, vec![Value::Text("Alice".to_string()), Value::Integer(30)]);
    assert_eq!(rows.next(&mut row), RowStep::EndOfStream);
}

#[test]
fn scenario_2_read_committed_sees_concurrent_commit() {
    let engine = users_engine();
    let t1 = Connection::open(&engine);
    t1.set_default_isolation(IsolationLevel::CommittedRead).unwrap();
    t1.begin().unwrap();

    let t2 = Connection::open(&engine);
    let insert = t2.prepare("INSERT INTO users(name,age) VALUES (?, ?)").unwrap();
    insert
        .exec(&[Value::Text("Bob".to_string()), Value::Integer(31)])
        .unwrap();

    assert_eq!(fetch_all_names(&t1), vec!["Bob".to_string()]);
    t1.commit().unwrap();
}

#[test]
fn scenario_3_repeatable_read_hides_concurrent_commit() {
    let engine = users_engine();
    let t1 = Connection::open(&engine);
    t1.set_default_isolation(IsolationLevel::RepeatableRead).unwrap();
    t1.begin().unwrap();
    // Force T1's snapshot into existence before T2 commits.
    assert!(fetch_all_names(&t1).is_empty());

    let t2 = Connection::open(&engine);
    let insert = t2.prepare("INSERT INTO users(name,age) VALUES (?, ?)").unwrap();
    insert
        .exec(&[Value::Text("Bob".to_string()), Value::Integer(31)])
        .unwrap();

    assert!(fetch_all_names(&t1).is_empty());
    t1.commit().unwrap();
    assert_eq!(fetch_all_names(&t1), vec!["Bob".to_string()]);
}

#[test]
fn scenario_4_write_conflict_under_read_committed() {
    let engine = users_engine();
    let setup = Connection::open(&engine);
    let insert = setup.prepare("INSERT INTO users(name,age) VALUES (?, ?)").unwrap();
    insert
        .exec(&[Value::Text("Alice".to_string()), Value::Integer(30)])
        .unwrap();

    let engine = Arc::new(engine);
    let e1 = Arc::clone(&engine);
    let e2 = Arc::clone(&engine);

    let h1 = thread::spawn(move || {
        let conn = Connection::open(&e1);
        conn.set_default_isolation(IsolationLevel::CommittedRead).unwrap();
        let update = conn.prepare("UPDATE users SET age=age+1 WHERE id=1").unwrap();
        update.exec(&[]).unwrap().rows_affected
    });
    let h2 = thread::spawn(move || {
        let conn = Connection::open(&e2);
        conn.set_default_isolation(IsolationLevel::CommittedRead).unwrap();
        let update = conn.prepare("UPDATE users SET age=age+1 WHERE id=1").unwrap();
        update.exec(&[]).unwrap().rows_affected
    });

    let r1 = h1.join().unwrap();
    let r2 = h2.join().unwrap();
    assert_eq!(r1, 1);
    assert_eq!(r2, 1);

    let select = setup.prepare("SELECT age FROM users WHERE id=1").unwrap();
    let mut rows = select.query(&[]).unwrap();
    let mut row = Vec::new();
    rows.next(&mut row);
    assert_eq!(row[0], Value::Integer(32));
}

#[test]
fn scenario_5_lock_timeout_bound() {
    let engine = Engine::with_config(EngineConfig::new().with_max_lock_wait_ms(100));
    let setup = Connection::open(&engine);
    setup
        .create_table(
            "users",
            vec![
                Column::auto_increment("id"),
                Column::new("name"),
                Column::new("age"),
            ],
        )
        .unwrap();
    let insert = setup.prepare("INSERT INTO users(name,age) VALUES (?, ?)").unwrap();
    insert
        .exec(&[Value::Text("Alice".to_string()), Value::Integer(30)])
        .unwrap();

    let holder = Connection::open(&engine);
    holder.begin().unwrap();
    let hold_update = holder.prepare("UPDATE users SET age=age+1 WHERE id=1").unwrap();
    hold_update.exec(&[]).unwrap();

    let waiter = Connection::open(&engine);
    let start = std::time::Instant::now();
    let wait_update = waiter.prepare("UPDATE users SET age=age+1 WHERE id=1").unwrap();
    let result = wait_update.exec(&[]);
    let elapsed = start.elapsed();

    assert!(result.is_err());
    assert!(elapsed < Duration::from_millis(400), "waited {:?}", elapsed);

    holder.rollback().unwrap();
}

#[test]
fn scenario_6_rollback_erases_update() {
    let engine = users_engine();
    let setup = Connection::open(&engine);
    let insert = setup.prepare("INSERT INTO users(name,age) VALUES (?, ?)").unwrap();
    insert
        .exec(&[Value::Text("Alice".to_string()), Value::Integer(30)])
        .unwrap();

    setup.begin().unwrap();
    let update = setup.prepare("UPDATE users SET age=99 WHERE id=1").unwrap();
    update.exec(&[]).unwrap();
    setup.rollback().unwrap();

    let select = setup.prepare("SELECT age FROM users WHERE id=1").unwrap();
    let mut rows = select.query(&[]).unwrap();
    let mut row = Vec::new();
    rows.next(&mut row);
    assert_eq!(row[0], Value::Integer(30));
}

#[test]
fn insert_then_select_round_trips_column_values() {
    let engine = users_engine();
    let conn = Connection::open(&engine);
    let insert = conn.prepare("INSERT INTO users(name,age) VALUES (?, ?)").unwrap();
    insert
        .exec(&[Value::Text("Carol".to_string()), Value::Integer(40)])
        .unwrap();

    let select = conn.prepare("SELECT * FROM users").unwrap();
    assert_eq!(select.query(&[]).unwrap().columns(), &["id", "name", "age"]);
}

#[test]
fn autoincrement_counter_advances_across_inserts() {
    let engine = users_engine();
    let conn = Connection::open(&engine);
    let insert = conn.prepare("INSERT INTO users(name,age) VALUES (?, ?)").unwrap();
    let first = insert
        .exec(&[Value::Text("A".to_string()), Value::Integer(1)])
        .unwrap();
    let second = insert
        .exec(&[Value::Text("B".to_string()), Value::Integer(2)])
        .unwrap();
    assert_eq!(first.last_insert_id, 1);
    assert_eq!(second.last_insert_id, 2);
}

#[test]
fn prepare_rejects_mismatched_argument_count() {
    let engine = users_engine();
    let conn = Connection::open(&engine);
    let select = conn.prepare("SELECT name FROM users WHERE id = ?").unwrap();
    assert_eq!(select.num_input(), 1);
    assert!(select.query(&[]).is_err());
}
