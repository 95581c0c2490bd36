//! A tiny REPL for exercising the engine by hand: opens an in-process
//! connection against a fresh [`Engine`] and runs whatever SQL is typed at
//! it, one statement per line.
//!
//! There is no `CREATE TABLE` grammar (schema migration is out of scope),
//! so the REPL seeds a starter `users(id, name, age)` table itself.

use std::io::{self, BufRead, Write};

use mvccdb_api::logging::LogConfig;
use mvccdb_api::{Connection, RowStep};
use mvccdb_core::table::Column;
use mvccdb_core::Engine;

fn main() {
    let _guard = LogConfig::info().init();

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
    .expect("seed table");

    println!("mvccdb> a starter table `users(id, name, age)` is ready.");
    println!("mvccdb> type SQL, one statement per line; Ctrl-D to exit.");

    let stdin = io::stdin();
    loop {
        print!("mvccdb> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        run_statement(&conn, line);
    }
}

fn run_statement(conn: &Connection, sql: &str) {
    let stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            eprintln!("parse error: {}", e);
            return;
        }
    };

    if stmt.num_input() > 0 {
        eprintln!(
            "error: this REPL does not bind parameters; {} placeholder(s) in statement",
            stmt.num_input()
        );
        return;
    }

    if stmt.is_query() {
        match stmt.query(&[]) {
            Ok(mut rows) => {
                println!("{}", rows.columns().join(" | "));
                let mut row = Vec::new();
                let mut count = 0;
                while rows.next(&mut row) == RowStep::Ok {
                    let rendered: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                    println!("{}", rendered.join(" | "));
                    count += 1;
                }
                println!("({} row(s))", count);
            }
            Err(e) => eprintln!("error: {}", e),
        }
    } else {
        match stmt.exec(&[]) {
            Ok(result) => println!(
                "ok (last_insert_id={}, rows_affected={})",
                result.last_insert_id, result.rows_affected
            ),
            Err(e) => eprintln!("error: {}", e),
        }
    }
}
