use mvccdb_api::logging::LogConfig;
use mvccdb_api::Connection;
use mvccdb_core::table::Column;
use mvccdb_core::{Engine, Value};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (info level with pretty output to stdout)
    let _guard = LogConfig::info().init();

    println!("=== mvccdb Logging Demo ===\n");

    let engine = Engine::new();
    let conn = Connection::open(&engine);
    conn.create_table(
        "users",
        vec![Column::auto_increment("id"), Column::new("name")],
    )?;

    println!("\n1. Inserting data...");
    let insert = conn.prepare("INSERT INTO users (name) VALUES (?)")?;
    insert.exec(&[Value::Text("Alice".to_string())])?;
    insert.exec(&[Value::Text("Bob".to_string())])?;
    insert.exec(&[Value::Text("Charlie".to_string())])?;

    println!("\n2. Reading data...");
    let select = conn.prepare("SELECT name FROM users WHERE id = ?")?;
    let mut rows = select.query(&[Value::Integer(1)])?;
    let mut row = Vec::new();
    if rows.next(&mut row) == mvccdb_api::RowStep::Ok {
        println!("Found: {}", row[0]);
    }

    println!("\n3. Deleting data...");
    let delete = conn.prepare("DELETE FROM users WHERE id = ?")?;
    delete.exec(&[Value::Integer(2)])?;

    println!("\n4. Running inside an explicit transaction...");
    conn.begin()?;
    let update = conn.prepare("UPDATE users SET name = ? WHERE id = ?")?;
    update.exec(&[Value::Text("Charles".to_string()), Value::Integer(3)])?;
    conn.commit()?;

    println!("\n=== Demo Complete ===");
    println!("Check the logs above to see tracing output!");

    Ok(())
}
