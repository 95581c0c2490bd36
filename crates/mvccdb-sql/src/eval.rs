//! Stack-machine expression evaluator.
//!
//! An [`Expression`] is compiled once into a flat list of [`Opcode`]s; the
//! [`Machine`] then runs those opcodes against a row (plus bound parameters)
//! to produce a single [`Value`]. Splitting compile from run lets a
//! `WHERE` clause be compiled once per statement and replayed per candidate
//! row rather than re-walking the AST for every tuple.

use mvccdb_core::error::Error;
use mvccdb_core::value::Value;

use crate::ast::{BinaryOperator, Expression, Literal, LogicalOperator};

/// One instruction in the compiled form of an expression.
#[derive(Debug, Clone)]
pub enum Opcode {
    PushConstant(Value),
    PushParam(usize),
    PushColumn(usize),
    BinaryOp(BinaryOperator),
    LogicalAnd,
    LogicalOr,
    Not,
}

/// Compiles an expression into a flat opcode list, resolving column names
/// to positional indices against `columns` up front so the machine never
/// needs to do name lookups per row.
pub fn compile(expr: &Expression, columns: &[String]) -> Result<Vec<Opcode>, Error> {
    let mut out = Vec::new();
    compile_into(expr, columns, &mut out)?;
    Ok(out)
}

fn compile_into(expr: &Expression, columns: &[String], out: &mut Vec<Opcode>) -> Result<(), Error> {
    match expr {
        Expression::Literal(lit) => {
            out.push(Opcode::PushConstant(literal_to_value(lit)));
            Ok(())
        }
        Expression::Param(ix) => {
            out.push(Opcode::PushParam(*ix));
            Ok(())
        }
        Expression::Column(name) => {
            let ix = columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown column '{}'", name)))?;
            out.push(Opcode::PushColumn(ix));
            Ok(())
        }
        Expression::BinaryOp { op, left, right } => {
            compile_into(left, columns, out)?;
            compile_into(right, columns, out)?;
            out.push(Opcode::BinaryOp(*op));
            Ok(())
        }
        Expression::LogicalOp { op, left, right } => {
            compile_into(left, columns, out)?;
            compile_into(right, columns, out)?;
            out.push(match op {
                LogicalOperator::And => Opcode::LogicalAnd,
                LogicalOperator::Or => Opcode::LogicalOr,
            });
            Ok(())
        }
        Expression::Not(inner) => {
            compile_into(inner, columns, out)?;
            out.push(Opcode::Not);
            Ok(())
        }
    }
}

fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Text(s) => Value::Text(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

/// Runs a compiled opcode list against one row and a set of bound
/// parameters, producing a single [`Value`].
pub struct Machine<'a> {
    params: &'a [Value],
    row: &'a [Value],
    stack: Vec<Value>,
}

impl<'a> Machine<'a> {
    pub fn new(params: &'a [Value], row: &'a [Value]) -> Self {
        Machine {
            params,
            row,
            stack: Vec::new(),
        }
    }

    pub fn run(&mut self, ops: &[Opcode]) -> Result<Value, Error> {
        self.stack.clear();
        for op in ops {
            self.step(op)?;
        }
        if self.stack.len() != 1 {
            return Err(Error::Internal(
                "expression stack not reduced to a single value".to_string(),
            ));
        }
        Ok(self.stack.pop().unwrap())
    }

    /// Convenience for `WHERE` clauses: runs the opcodes and coerces the
    /// result to a boolean (`NULL` is treated as false, SQL three-valued
    /// logic is out of scope).
    pub fn run_predicate(&mut self, ops: &[Opcode]) -> Result<bool, Error> {
        match self.run(ops)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(Error::InvalidArgument(format!(
                "expression did not evaluate to a boolean: {:?}",
                other
            ))),
        }
    }

    fn step(&mut self, op: &Opcode) -> Result<(), Error> {
        match op {
            Opcode::PushConstant(v) => {
                self.stack.push(v.clone());
                Ok(())
            }
            Opcode::PushParam(ix) => {
                let v = self
                    .params
                    .get(*ix)
                    .ok_or_else(|| Error::InvalidArgument(format!("missing bound parameter {}", ix)))?;
                self.stack.push(v.clone());
                Ok(())
            }
            Opcode::PushColumn(ix) => {
                let v = self
                    .row
                    .get(*ix)
                    .ok_or_else(|| Error::Internal(format!("column index {} out of range", ix)))?;
                self.stack.push(v.clone());
                Ok(())
            }
            Opcode::BinaryOp(op) => self.binary_op(*op),
            Opcode::LogicalAnd => self.logical(|a, b| a && b),
            Opcode::LogicalOr => self.logical(|a, b| a || b),
            Opcode::Not => {
                let top = self.pop()?;
                match top {
                    Value::Bool(b) => {
                        self.stack.push(Value::Bool(!b));
                        Ok(())
                    }
                    Value::Null => {
                        self.stack.push(Value::Null);
                        Ok(())
                    }
                    other => Err(Error::InvalidArgument(format!(
                        "NOT applied to non-boolean value: {:?}",
                        other
                    ))),
                }
            }
        }
    }

    fn logical(&mut self, f: impl Fn(bool, bool) -> bool) -> Result<(), Error> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Bool(a), Value::Bool(b)) => {
                self.stack.push(Value::Bool(f(a, b)));
                Ok(())
            }
            (Value::Null, _) | (_, Value::Null) => {
                self.stack.push(Value::Null);
                Ok(())
            }
            (a, b) => Err(Error::InvalidArgument(format!(
                "logical operator applied to non-boolean operands: {:?}, {:?}",
                a, b
            ))),
        }
    }

    fn binary_op(&mut self, op: BinaryOperator) -> Result<(), Error> {
        let b = self.pop()?;
        let a = self.pop()?;

        use BinaryOperator::*;
        let result = match op {
            Eq | NotEq | Lt | LtEq | Gt | GtEq => {
                if matches!(a, Value::Null) || matches!(b, Value::Null) {
                    Value::Null
                } else {
                    let ord = a.partial_cmp(&b).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "values are not comparable: {:?}, {:?}",
                            a, b
                        ))
                    })?;
                    let truth = match op {
                        Eq => ord == std::cmp::Ordering::Equal,
                        NotEq => ord != std::cmp::Ordering::Equal,
                        Lt => ord == std::cmp::Ordering::Less,
                        LtEq => ord != std::cmp::Ordering::Greater,
                        Gt => ord == std::cmp::Ordering::Greater,
                        GtEq => ord != std::cmp::Ordering::Less,
                        _ => unreachable!(),
                    };
                    Value::Bool(truth)
                }
            }
            Add | Sub | Mul | Div => arithmetic(op, &a, &b)?,
        };
        self.stack.push(result);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::Internal("expression stack underflow".to_string()))
    }
}

fn arithmetic(op: BinaryOperator, a: &Value, b: &Value) -> Result<Value, Error> {
    use BinaryOperator::*;
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => {
            let result = match op {
                Add => x.checked_add(*y),
                Sub => x.checked_sub(*y),
                Mul => x.checked_mul(*y),
                Div => {
                    if *y == 0 {
                        return Err(Error::InvalidArgument("division by zero".to_string()));
                    }
                    x.checked_div(*y)
                }
                _ => unreachable!(),
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| Error::InvalidArgument("integer overflow".to_string()))
        }
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        _ => {
            let x = as_f64(a)?;
            let y = as_f64(b)?;
            let result = match op {
                Add => x + y,
                Sub => x - y,
                Mul => x * y,
                Div => {
                    if y == 0.0 {
                        return Err(Error::InvalidArgument("division by zero".to_string()));
                    }
                    x / y
                }
                _ => unreachable!(),
            };
            Ok(Value::Float(result))
        }
    }
}

fn as_f64(v: &Value) -> Result<f64, Error> {
    match v {
        Value::Integer(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(Error::InvalidArgument(format!(
            "expected a numeric value, found {:?}",
            other
        ))),
    }
}
