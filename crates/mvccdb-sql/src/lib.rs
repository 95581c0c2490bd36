//! Tokenizer, AST, recursive-descent parser, and stack-machine expression
//! evaluator for the SQL front end.
//!
//! This crate has no notion of tables, transactions, or storage: it turns
//! SQL text into a [`ast::Statement`] and compiled `WHERE`/value
//! expressions into runnable [`eval::Opcode`] sequences. Wiring those
//! against a live engine is `mvccdb-api`'s job.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::Statement;
pub use parser::{parse, ParseError, Parser};

#[cfg(test)]
mod tests {
    use super::*;
    use ast::*;

    #[test]
    fn parses_simple_select() {
        let stmt = parse("SELECT name, age FROM users WHERE id = ?").unwrap();
        match stmt {
            Statement::Select(s) => {
                assert_eq!(s.table.name, "users");
                assert_eq!(s.columns, SelectColumns::Named(vec!["name".into(), "age".into()]));
                assert!(!s.for_update);
                assert!(s.where_clause.is_some());
            }
            other => panic!("expected Select, got {:?}", other),
        }
    }

    #[test]
    fn parses_select_star_for_update() {
        let stmt = parse("SELECT * FROM users WHERE id = 1 FOR UPDATE").unwrap();
        match stmt {
            Statement::Select(s) => {
                assert_eq!(s.columns, SelectColumns::All);
                assert!(s.for_update);
            }
            other => panic!("expected Select, got {:?}", other),
        }
    }

    #[test]
    fn parses_insert() {
        let stmt = parse("INSERT INTO users (name, age) VALUES ('Alice', 30)").unwrap();
        match stmt {
            Statement::Insert(i) => {
                assert_eq!(i.table.name, "users");
                assert_eq!(i.columns, vec!["name".to_string(), "age".to_string()]);
                assert_eq!(i.values.len(), 2);
            }
            other => panic!("expected Insert, got {:?}", other),
        }
    }

    #[test]
    fn parses_update_with_arithmetic_assignment() {
        let stmt = parse("UPDATE users SET age = age + 1 WHERE id = 1").unwrap();
        match stmt {
            Statement::Update(u) => {
                assert_eq!(u.assignments.len(), 1);
                assert_eq!(u.assignments[0].0, "age");
                match &u.assignments[0].1 {
                    Expression::BinaryOp { op, .. } => assert_eq!(*op, BinaryOperator::Add),
                    other => panic!("expected BinaryOp, got {:?}", other),
                }
            }
            other => panic!("expected Update, got {:?}", other),
        }
    }

    #[test]
    fn parses_delete() {
        let stmt = parse("DELETE FROM users WHERE id = 1").unwrap();
        assert!(matches!(stmt, Statement::Delete(_)));
    }

    #[test]
    fn parses_transaction_control() {
        assert_eq!(parse("BEGIN").unwrap(), Statement::Begin);
        assert_eq!(parse("COMMIT").unwrap(), Statement::Commit);
        assert_eq!(parse("ROLLBACK").unwrap(), Statement::Rollback);
        assert_eq!(
            parse("AUTOCOMMIT OFF").unwrap(),
            Statement::SetAutocommit(false)
        );
    }

    #[test]
    fn where_precedence_and_binds_tighter_than_or() {
        let stmt = parse("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3").unwrap();
        let where_clause = match stmt {
            Statement::Select(s) => s.where_clause.unwrap(),
            other => panic!("expected Select, got {:?}", other),
        };
        match where_clause {
            Expression::LogicalOp { op: LogicalOperator::Or, right, .. } => {
                assert!(matches!(
                    *right,
                    Expression::LogicalOp { op: LogicalOperator::And, .. }
                ));
            }
            other => panic!("expected top-level OR, got {:?}", other),
        }
    }

    #[test]
    fn evaluates_compiled_where_clause_against_a_row() {
        use eval::{compile, Machine};
        use mvccdb_core::value::Value;

        let stmt = parse("SELECT * FROM users WHERE age >= 18 AND name = 'Alice'").unwrap();
        let where_clause = match stmt {
            Statement::Select(s) => s.where_clause.unwrap(),
            other => panic!("expected Select, got {:?}", other),
        };
        let columns = vec!["name".to_string(), "age".to_string()];
        let ops = compile(&where_clause, &columns).unwrap();

        let row = vec![Value::Text("Alice".to_string()), Value::Integer(30)];
        let mut machine = Machine::new(&[], &row);
        assert!(machine.run_predicate(&ops).unwrap());

        let row2 = vec![Value::Text("Bob".to_string()), Value::Integer(30)];
        let mut machine2 = Machine::new(&[], &row2);
        assert!(!machine2.run_predicate(&ops).unwrap());
    }

    #[test]
    fn evaluates_bound_parameter() {
        use eval::{compile, Machine};
        use mvccdb_core::value::Value;

        let stmt = parse("SELECT * FROM users WHERE id = ?").unwrap();
        let where_clause = match stmt {
            Statement::Select(s) => s.where_clause.unwrap(),
            other => panic!("expected Select, got {:?}", other),
        };
        let columns = vec!["id".to_string()];
        let ops = compile(&where_clause, &columns).unwrap();

        let row = vec![Value::Integer(1)];
        let params = vec![Value::Integer(1)];
        let mut machine = Machine::new(&params, &row);
        assert!(machine.run_predicate(&ops).unwrap());
    }
}
