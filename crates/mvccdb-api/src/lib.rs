//! # mvccdb-api
//!
//! The driver surface for `mvccdb`: `Connection`/`Statement`/`Rows`, the
//! executor that wires parsed SQL onto the storage engine, and (behind the
//! `rest` feature) a thin HTTP mirror of the same surface.
//!
//! ## Quick start
//!
//! ```rust
//! use mvccdb_core::{Engine, Value, table::Column};
//! use mvccdb_api::Connection;
//!
//! # fn main() -> mvccdb_core::Result<()> {
//! let engine = Engine::new();
//! let conn = Connection::open(&engine);
//! conn.create_table("users", vec![
//!     Column::auto_increment("id"),
//!     Column::new("name"),
//!     Column::new("age"),
//! ])?;
//!
//! let insert = conn.prepare("INSERT INTO users (name, age) VALUES (?, ?)")?;
//! let result = insert.exec(&[Value::Text("Alice".to_string()), Value::Integer(30)])?;
//! assert_eq!(result.last_insert_id, 1);
//!
//! let select = conn.prepare("SELECT name, age FROM users WHERE id = ?")?;
//! let mut rows = select.query(&[Value::Integer(1)])?;
//! let mut row = Vec::new();
//! assert_eq!(rows.next(&mut row), mvccdb_api::RowStep::Ok);
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod logging;
pub mod security;

#[cfg(feature = "rest")]
pub mod rest;

pub use driver::{Connection, ExecResult, Rows, RowStep, Statement, DEFAULT_SCHEMA};
