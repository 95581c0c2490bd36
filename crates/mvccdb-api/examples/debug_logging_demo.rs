use mvccdb_api::logging::LogConfig;
use mvccdb_api::Connection;
use mvccdb_core::table::Column;
use mvccdb_core::{Engine, Value};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize debug-level logging
    let _guard = LogConfig::debug().init();

    println!("=== mvccdb Debug Logging Demo ===\n");

    let engine = Engine::new();
    let conn = Connection::open(&engine);
    conn.create_table(
        "users",
        vec![Column::auto_increment("id"), Column::new("title")],
    )?;

    println!("\n1. Writing data with debug logs...");
    let insert = conn.prepare("INSERT INTO users (title) VALUES (?)")?;
    insert.exec(&[Value::Text("Alice Smith - Engineer".to_string())])?;
    insert.exec(&[Value::Text("Bob Jones - Manager".to_string())])?;

    println!("\n2. Reading data with debug logs...");
    let select = conn.prepare("SELECT title FROM users WHERE id = ?")?;
    let mut rows = select.query(&[Value::Integer(1)])?;
    let mut row = Vec::new();
    if rows.next(&mut row) == mvccdb_api::RowStep::Ok {
        println!("Found: {}", row[0]);
    }

    println!("\n3. Deleting with debug logs...");
    let delete = conn.prepare("DELETE FROM users WHERE id = ?")?;
    delete.exec(&[Value::Integer(2)])?;

    println!("\n=== Debug Logging Demo Complete ===");

    Ok(())
}
