//! Demonstrates read-committed vs. repeatable-read visibility across two
//! connections sharing one engine.

use mvccdb_api::Connection;
use mvccdb_core::table::Column;
use mvccdb_core::{Engine, IsolationLevel, Value};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::new();

    let setup = Connection::open(&engine);
    setup.create_table(
        "users",
        vec![Column::auto_increment("id"), Column::new("name"), Column::new("age")],
    )?;
    let insert = setup.prepare("INSERT INTO users (name, age) VALUES (?, ?)")?;
    insert.exec(&[Value::Text("Alice".to_string()), Value::Integer(30)])?;

    println!("=== Repeatable read isolates a concurrent insert ===");
    let t1 = Connection::open(&engine);
    t1.set_default_isolation(IsolationLevel::RepeatableRead)?;
    t1.begin()?;
    let t1_select = t1.prepare("SELECT name FROM users")?;
    // Force T1's snapshot to be taken now, before T2 inserts Bob.
    let mut rows = t1_select.query(&[])?;
    let mut row = Vec::new();
    let mut before: Vec<String> = Vec::new();
    while rows.next(&mut row) == mvccdb_api::RowStep::Ok {
        before.push(row[0].to_string());
    }
    println!("T1 sees before T2's insert: {:?}", before);

    let t2 = Connection::open(&engine);
    let t2_insert = t2.prepare("INSERT INTO users (name, age) VALUES (?, ?)")?;
    t2_insert.exec(&[Value::Text("Bob".to_string()), Value::Integer(31)])?;
    println!("T2 autocommit-inserted Bob");

    let mut rows = t1_select.query(&[])?;
    let mut after: Vec<String> = Vec::new();
    while rows.next(&mut row) == mvccdb_api::RowStep::Ok {
        after.push(row[0].to_string());
    }
    println!("T1 still sees (repeatable read): {:?}", after);
    assert_eq!(before, after);
    t1.commit()?;

    let post_commit = setup.prepare("SELECT name FROM users")?;
    let mut rows = post_commit.query(&[])?;
    let mut everyone: Vec<String> = Vec::new();
    while rows.next(&mut row) == mvccdb_api::RowStep::Ok {
        everyone.push(row[0].to_string());
    }
    println!("A fresh connection now sees: {:?}", everyone);

    Ok(())
}
