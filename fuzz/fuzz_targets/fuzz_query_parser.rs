#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(sql) = std::str::from_utf8(data) {
        if sql.len() > 10_000 {
            return;
        }

        // Parsing and compiling arbitrary SQL text must never panic.
        if let Ok(stmt) = mvccdb_sql::parse(sql) {
            let columns = vec!["a".to_string(), "b".to_string(), "c".to_string()];
            let where_clause = match &stmt {
                mvccdb_sql::Statement::Select(s) => s.where_clause.as_ref(),
                _ => None,
            };
            if let Some(expr) = where_clause {
                let _ = mvccdb_sql::eval::compile(expr, &columns);
            }
        }
    }
});
