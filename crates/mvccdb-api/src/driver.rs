//! The embedding driver surface: `Connection`, `Statement`, `Rows`, and the
//! thin executor that wires parsed SQL onto the storage engine.

use std::sync::Arc;

use mvccdb_core::table::{BaseTable, Column, TableHandle};
use mvccdb_core::{ConnectionContext, Engine, Error, IsolationLevel, Result, Value};
use mvccdb_sql::ast::{self, Statement as Ast};
use mvccdb_sql::eval::{self, Machine};

use crate::security;

/// Schema new connections resolve bare (unqualified) table names against.
pub const DEFAULT_SCHEMA: &str = "public";

/// Outcome of a non-row-returning statement (`INSERT`/`UPDATE`/`DELETE`/
/// session control). `-1` in either field means "not applicable", matching
/// the driver convention described in the external interfaces design.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecResult {
    pub last_insert_id: i64,
    pub rows_affected: i64,
}

impl ExecResult {
    fn not_applicable() -> Self {
        ExecResult {
            last_insert_id: -1,
            rows_affected: -1,
        }
    }
}

/// A materialized result set. Rows are fully evaluated (no joins/aggregates
/// to stream incrementally) and handed over column-major metadata plus
/// row-major data.
pub struct Rows {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

/// What happened on a [`Rows::next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStep {
    Ok,
    EndOfStream,
}

impl Rows {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Writes the next row into `row_buf` and returns [`RowStep::Ok`], or
    /// leaves `row_buf` untouched and returns [`RowStep::EndOfStream`].
    pub fn next(&mut self, row_buf: &mut Vec<Value>) -> RowStep {
        if self.cursor >= self.rows.len() {
            return RowStep::EndOfStream;
        }
        row_buf.clear();
        row_buf.extend(self.rows[self.cursor].iter().cloned());
        self.cursor += 1;
        RowStep::Ok
    }
}

/// One connection to an [`Engine`]: owns at most one live transaction and
/// resolves unqualified table names against [`DEFAULT_SCHEMA`].
pub struct Connection {
    ctx: Arc<ConnectionContext>,
}

impl Connection {
    /// Opens an in-process connection. The driver design's `open(dsn)`
    /// collapses to this for an embedded engine; a remote DSN would dial
    /// the REST surface instead (see `crate::rest`), not this constructor.
    pub fn open(engine: &Engine) -> Self {
        Connection {
            ctx: Arc::new(engine.connect()),
        }
    }

    /// Declares a base table. Schema migration via SQL `CREATE TABLE` is
    /// out of scope; tables are declared through this API call instead.
    pub fn create_table(&self, name: &str, columns: Vec<Column>) -> Result<Arc<BaseTable>> {
        self.ctx.catalog().create_table(DEFAULT_SCHEMA, name, columns)
    }

    pub fn begin(&self) -> Result<()> {
        self.ctx.begin()
    }

    pub fn commit(&self) -> Result<()> {
        self.ctx.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.ctx.rollback()
    }

    pub fn set_autocommit(&self, on: bool) -> Result<()> {
        self.ctx.set_autocommit(on)
    }

    /// Seeds the isolation level every subsequently started transaction on
    /// this connection uses, absent a per-statement override (there is no
    /// per-statement override today: the grammar carries no `SET
    /// TRANSACTION ISOLATION LEVEL`).
    pub fn set_default_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.ctx.set_default_isolation(level)
    }

    pub fn close(&self) -> Result<()> {
        self.ctx.close()
    }

    /// Parses `sql` and counts its bound-parameter placeholders.
    pub fn prepare(&self, sql: &str) -> Result<Statement> {
        security::validate_query(sql)?;
        let ast = mvccdb_sql::parse(sql).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let num_input = count_placeholders(&ast);
        Ok(Statement {
            ctx: Arc::clone(&self.ctx),
            ast,
            num_input,
        })
    }
}

fn count_placeholders(stmt: &Ast) -> usize {
    fn walk(expr: &ast::Expression, max: &mut usize) {
        match expr {
            ast::Expression::Param(ix) => {
                if *ix + 1 > *max {
                    *max = *ix + 1;
                }
            }
            ast::Expression::BinaryOp { left, right, .. } | ast::Expression::LogicalOp { left, right, .. } => {
                walk(left, max);
                walk(right, max);
            }
            ast::Expression::Not(inner) => walk(inner, max),
            ast::Expression::Column(_) | ast::Expression::Literal(_) => {}
        }
    }

    let mut max = 0;
    match stmt {
        Ast::Select(s) => {
            if let Some(w) = &s.where_clause {
                walk(w, &mut max);
            }
        }
        Ast::Insert(i) => {
            for v in &i.values {
                walk(v, &mut max);
            }
        }
        Ast::Update(u) => {
            for (_, v) in &u.assignments {
                walk(v, &mut max);
            }
            if let Some(w) = &u.where_clause {
                walk(w, &mut max);
            }
        }
        Ast::Delete(d) => {
            if let Some(w) = &d.where_clause {
                walk(w, &mut max);
            }
        }
        Ast::Begin | Ast::Commit | Ast::Rollback | Ast::SetAutocommit(_) => {}
    }
    max
}

fn resolve_schema(table: &ast::TableRef) -> &str {
    table.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
}

fn base_table(ctx: &ConnectionContext, table: &ast::TableRef) -> Result<Arc<BaseTable>> {
    match ctx.catalog().get_table(resolve_schema(table), &table.name)? {
        TableHandle::Base(t) => Ok(t),
        TableHandle::Temp(_) => Err(Error::InvalidArgument(format!(
            "{} is a temporary table; DML against it is not supported",
            table.name
        ))),
    }
}

fn column_names(table: &BaseTable) -> Vec<String> {
    table.columns().iter().map(|c| c.name.clone()).collect()
}

/// A prepared statement, bound to the connection it came from.
pub struct Statement {
    ctx: Arc<ConnectionContext>,
    ast: Ast,
    num_input: usize,
}

impl Statement {
    pub fn num_input(&self) -> usize {
        self.num_input
    }

    /// Whether this statement returns rows (`query()`) or not (`exec()`).
    pub fn is_query(&self) -> bool {
        matches!(self.ast, Ast::Select(_))
    }

    fn check_args(&self, args: &[Value]) -> Result<()> {
        if args.len() != self.num_input {
            return Err(Error::InvalidArgument(format!(
                "expected {} bound parameter(s), got {}",
                self.num_input,
                args.len()
            )));
        }
        Ok(())
    }

    /// Runs a non-row-returning statement.
    pub fn exec(&self, args: &[Value]) -> Result<ExecResult> {
        self.check_args(args)?;
        match &self.ast {
            Ast::Select(_) => Err(Error::InvalidState(
                "SELECT must be run via query(), not exec()".to_string(),
            )),
            Ast::Insert(insert) => self.exec_insert(insert, args),
            Ast::Update(update) => self.exec_update(update, args),
            Ast::Delete(delete) => self.exec_delete(delete, args),
            Ast::Begin => {
                self.ctx.begin()?;
                Ok(ExecResult::not_applicable())
            }
            Ast::Commit => {
                self.ctx.commit()?;
                Ok(ExecResult::not_applicable())
            }
            Ast::Rollback => {
                self.ctx.rollback()?;
                Ok(ExecResult::not_applicable())
            }
            Ast::SetAutocommit(on) => {
                self.ctx.set_autocommit(*on)?;
                Ok(ExecResult::not_applicable())
            }
        }
    }

    /// Runs a row-returning statement.
    pub fn query(&self, args: &[Value]) -> Result<Rows> {
        self.check_args(args)?;
        match &self.ast {
            Ast::Select(select) => self.exec_select(select, args),
            other => Err(Error::InvalidState(format!(
                "{:?} does not return rows; use exec()",
                other
            ))),
        }
    }

    fn exec_insert(&self, insert: &ast::InsertStmt, args: &[Value]) -> Result<ExecResult> {
        let table = base_table(&self.ctx, &insert.table)?;
        let columns = table.columns().to_vec();
        let mut row = vec![Value::Null; columns.len()];
        let empty_row: [Value; 0] = [];

        if insert.columns.is_empty() {
            if insert.values.len() != columns.len() {
                return Err(Error::InvalidArgument(format!(
                    "expected {} values, got {}",
                    columns.len(),
                    insert.values.len()
                )));
            }
            for (ix, expr) in insert.values.iter().enumerate() {
                let ops = eval::compile(expr, &[])?;
                row[ix] = Machine::new(args, &empty_row).run(&ops)?;
            }
        } else {
            if insert.columns.len() != insert.values.len() {
                return Err(Error::InvalidArgument(
                    "column list and values list have different lengths".to_string(),
                ));
            }
            for (name, expr) in insert.columns.iter().zip(insert.values.iter()) {
                let ix = columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| Error::NotFound(format!("unknown column '{}'", name)))?;
                let ops = eval::compile(expr, &[])?;
                row[ix] = Machine::new(args, &empty_row).run(&ops)?;
            }
            for (ix, col) in columns.iter().enumerate() {
                if col.auto_increment && !insert.columns.iter().any(|n| n == &col.name) {
                    row[ix] = Value::Integer(table.increment(&col.name)? as i64);
                }
            }
        }

        let tx = self.ctx.ensure_transaction()?;
        let id = table.insert(row, &tx, self.ctx.manager())?;
        self.ctx.end_statement(&tx)?;
        Ok(ExecResult {
            last_insert_id: id as i64,
            rows_affected: 1,
        })
    }

    fn exec_update(&self, update: &ast::UpdateStmt, args: &[Value]) -> Result<ExecResult> {
        let table = base_table(&self.ctx, &update.table)?;
        let columns = column_names(&table);
        let where_ops = update
            .where_clause
            .as_ref()
            .map(|e| eval::compile(e, &columns))
            .transpose()?;
        let assignments: Vec<(usize, Vec<eval::Opcode>)> = update
            .assignments
            .iter()
            .map(|(name, expr)| {
                let ix = columns
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| Error::NotFound(format!("unknown column '{}'", name)))?;
                Ok((ix, eval::compile(expr, &columns)?))
            })
            .collect::<Result<_>>()?;

        let tx = self.ctx.ensure_transaction()?;
        let mut iter = table.new_iterator(&tx, self.ctx.manager(), true, false)?;
        let mut matched: Vec<(u64, Vec<Value>)> = Vec::new();
        let predicate_args = args;
        while let Some((id, row)) = iter.next_matching(|row| match &where_ops {
            Some(ops) => Machine::new(predicate_args, row).run_predicate(ops),
            None => Ok(true),
        })? {
            matched.push((id, row));
        }
        drop(iter);

        let mut count = 0i64;
        for (id, mut row) in matched {
            for (ix, ops) in &assignments {
                row[*ix] = Machine::new(args, &row.clone()).run(ops)?;
            }
            table.update(id, row, &tx, self.ctx.manager())?;
            count += 1;
        }
        self.ctx.end_statement(&tx)?;
        Ok(ExecResult {
            last_insert_id: -1,
            rows_affected: count,
        })
    }

    fn exec_delete(&self, delete: &ast::DeleteStmt, args: &[Value]) -> Result<ExecResult> {
        let table = base_table(&self.ctx, &delete.table)?;
        let columns = column_names(&table);
        let where_ops = delete
            .where_clause
            .as_ref()
            .map(|e| eval::compile(e, &columns))
            .transpose()?;

        let tx = self.ctx.ensure_transaction()?;
        let mut iter = table.new_iterator(&tx, self.ctx.manager(), true, false)?;
        let mut matched: Vec<u64> = Vec::new();
        while let Some((id, row)) = iter.next_matching(|row| match &where_ops {
            Some(ops) => Machine::new(args, row).run_predicate(ops),
            None => Ok(true),
        })? {
            matched.push(id);
        }
        drop(iter);

        for id in &matched {
            table.delete(*id, &tx, self.ctx.manager())?;
        }
        self.ctx.end_statement(&tx)?;
        Ok(ExecResult {
            last_insert_id: -1,
            rows_affected: matched.len() as i64,
        })
    }

    fn exec_select(&self, select: &ast::SelectStmt, args: &[Value]) -> Result<Rows> {
        let table = base_table(&self.ctx, &select.table)?;
        let columns = column_names(&table);
        let where_ops = select
            .where_clause
            .as_ref()
            .map(|e| eval::compile(e, &columns))
            .transpose()?;

        let projection: Vec<usize> = match &select.columns {
            ast::SelectColumns::All => (0..table.columns().len())
                .filter(|&ix| !table.columns()[ix].hidden)
                .collect(),
            ast::SelectColumns::Named(names) => names
                .iter()
                .map(|name| {
                    columns
                        .iter()
                        .position(|c| c == name)
                        .ok_or_else(|| Error::NotFound(format!("unknown column '{}'", name)))
                })
                .collect::<Result<_>>()?,
        };
        let out_columns: Vec<String> = projection.iter().map(|&ix| columns[ix].clone()).collect();

        let tx = self.ctx.ensure_transaction()?;
        let mut iter = table.new_iterator(&tx, self.ctx.manager(), false, select.for_update)?;
        let mut out_rows = Vec::new();
        while let Some((_, row)) = iter.next_matching(|row| match &where_ops {
            Some(ops) => Machine::new(args, row).run_predicate(ops),
            None => Ok(true),
        })? {
            out_rows.push(projection.iter().map(|&ix| row[ix].clone()).collect());
        }
        drop(iter);
        self.ctx.end_statement(&tx)?;

        Ok(Rows {
            columns: out_columns,
            rows: out_rows,
            cursor: 0,
        })
    }
}
