//! Recursive-descent parser over the token stream produced by [`crate::lexer`].

use crate::ast::*;
use crate::lexer::Token;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

fn err<T>(message: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError {
        message: message.into(),
    })
}

/// A recursive-descent parser holding a borrowed token stream and cursor.
pub struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    param_counter: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Parser {
            tokens,
            position: 0,
            param_counter: 0,
        }
    }

    /// Parses exactly one statement, optionally terminated by `;`.
    pub fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let stmt = match self.peek() {
            Token::Select => self.parse_select().map(Statement::Select)?,
            Token::Insert => self.parse_insert().map(Statement::Insert)?,
            Token::Update => self.parse_update().map(Statement::Update)?,
            Token::Delete => self.parse_delete().map(Statement::Delete)?,
            Token::Begin => {
                self.advance();
                Statement::Begin
            }
            Token::Commit => {
                self.advance();
                Statement::Commit
            }
            Token::Rollback => {
                self.advance();
                Statement::Rollback
            }
            Token::Autocommit => {
                self.advance();
                match self.peek() {
                    Token::On => {
                        self.advance();
                        Statement::SetAutocommit(true)
                    }
                    Token::Off => {
                        self.advance();
                        Statement::SetAutocommit(false)
                    }
                    other => return err(format!("expected ON or OFF after AUTOCOMMIT, got {:?}", other)),
                }
            }
            other => return err(format!("unexpected token at start of statement: {:?}", other)),
        };

        if self.peek() == &Token::Semicolon {
            self.advance();
        }
        if self.peek() != &Token::Eof {
            return err(format!("trailing tokens after statement: {:?}", self.peek()));
        }
        Ok(stmt)
    }

    fn parse_select(&mut self) -> Result<SelectStmt, ParseError> {
        self.expect(&Token::Select)?;
        let columns = if self.peek() == &Token::Star {
            self.advance();
            SelectColumns::All
        } else {
            let mut names = vec![self.expect_identifier()?];
            while self.peek() == &Token::Comma {
                self.advance();
                names.push(self.expect_identifier()?);
            }
            SelectColumns::Named(names)
        };
        self.expect(&Token::From)?;
        let table = self.parse_table_ref()?;
        let where_clause = self.parse_optional_where()?;
        let for_update = self.parse_optional_for_update()?;
        Ok(SelectStmt {
            table,
            columns,
            where_clause,
            for_update,
        })
    }

    fn parse_optional_for_update(&mut self) -> Result<bool, ParseError> {
        if self.peek() == &Token::For {
            self.advance();
            self.expect(&Token::Update)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_insert(&mut self) -> Result<InsertStmt, ParseError> {
        self.expect(&Token::Insert)?;
        self.expect(&Token::Into)?;
        let table = self.parse_table_ref()?;
        let mut columns = Vec::new();
        if self.peek() == &Token::LParen {
            self.advance();
            columns.push(self.expect_identifier()?);
            while self.peek() == &Token::Comma {
                self.advance();
                columns.push(self.expect_identifier()?);
            }
            self.expect(&Token::RParen)?;
        }
        self.expect(&Token::Values)?;
        self.expect(&Token::LParen)?;
        let mut values = vec![self.parse_expression()?];
        while self.peek() == &Token::Comma {
            self.advance();
            values.push(self.parse_expression()?);
        }
        self.expect(&Token::RParen)?;
        Ok(InsertStmt {
            table,
            columns,
            values,
        })
    }

    fn parse_update(&mut self) -> Result<UpdateStmt, ParseError> {
        self.expect(&Token::Update)?;
        let table = self.parse_table_ref()?;
        self.expect(&Token::Set)?;
        let mut assignments = vec![self.parse_assignment()?];
        while self.peek() == &Token::Comma {
            self.advance();
            assignments.push(self.parse_assignment()?);
        }
        let where_clause = self.parse_optional_where()?;
        Ok(UpdateStmt {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_assignment(&mut self) -> Result<(String, Expression), ParseError> {
        let name = self.expect_identifier()?;
        self.expect(&Token::Eq)?;
        let value = self.parse_expression()?;
        Ok((name, value))
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt, ParseError> {
        self.expect(&Token::Delete)?;
        self.expect(&Token::From)?;
        let table = self.parse_table_ref()?;
        let where_clause = self.parse_optional_where()?;
        Ok(DeleteStmt {
            table,
            where_clause,
        })
    }

    fn parse_optional_where(&mut self) -> Result<Option<Expression>, ParseError> {
        if self.peek() == &Token::Where {
            self.advance();
            Ok(Some(self.parse_expression()?))
        } else {
            Ok(None)
        }
    }

    fn parse_table_ref(&mut self) -> Result<TableRef, ParseError> {
        let first = self.expect_identifier()?;
        if self.peek() == &Token::Dot {
            self.advance();
            let name = self.expect_identifier()?;
            Ok(TableRef {
                schema: Some(first),
                name,
            })
        } else {
            Ok(TableRef {
                schema: None,
                name: first,
            })
        }
    }

    // Expression precedence, loosest to tightest:
    //   or -> and -> not -> comparison -> additive -> multiplicative -> primary
    pub fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek() == &Token::Or {
            self.advance();
            let right = self.parse_and()?;
            left = Expression::LogicalOp {
                op: LogicalOperator::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_not()?;
        while self.peek() == &Token::And {
            self.advance();
            let right = self.parse_not()?;
            left = Expression::LogicalOp {
                op: LogicalOperator::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, ParseError> {
        if self.peek() == &Token::Not {
            self.advance();
            let inner = self.parse_not()?;
            Ok(Expression::Not(Box::new(inner)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Token::Eq => BinaryOperator::Eq,
            Token::NotEq => BinaryOperator::NotEq,
            Token::Lt => BinaryOperator::Lt,
            Token::LtEq => BinaryOperator::LtEq,
            Token::Gt => BinaryOperator::Gt,
            Token::GtEq => BinaryOperator::GtEq,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expression::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expression::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOperator::Mul,
                Token::Slash => BinaryOperator::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_primary()?;
            left = Expression::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        match self.peek().clone() {
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Minus => {
                self.advance();
                let inner = self.parse_primary()?;
                Ok(Expression::BinaryOp {
                    op: BinaryOperator::Sub,
                    left: Box::new(Expression::Literal(Literal::Integer(0))),
                    right: Box::new(inner),
                })
            }
            Token::Placeholder => {
                self.advance();
                let ix = self.next_param_index();
                Ok(Expression::Param(ix))
            }
            Token::Integer(v) => {
                self.advance();
                Ok(Expression::Literal(Literal::Integer(v)))
            }
            Token::Float(v) => {
                self.advance();
                Ok(Expression::Literal(Literal::Float(v)))
            }
            Token::StringLiteral(s) => {
                self.advance();
                Ok(Expression::Literal(Literal::Text(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expression::Literal(Literal::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expression::Literal(Literal::Bool(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expression::Literal(Literal::Null))
            }
            Token::Identifier(name) => {
                self.advance();
                Ok(Expression::Column(name))
            }
            other => err(format!("unexpected token in expression: {:?}", other)),
        }
    }

    fn next_param_index(&mut self) -> usize {
        let ix = self.param_counter;
        self.param_counter += 1;
        ix
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            err(format!("expected {:?}, found {:?}", expected, self.peek()))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => err(format!("expected identifier, found {:?}", other)),
        }
    }
}

/// Convenience entry point: tokenizes and parses a single statement.
pub fn parse(sql: &str) -> Result<Statement, ParseError> {
    let tokens = crate::lexer::tokenize(sql).map_err(|e| ParseError {
        message: e.to_string(),
    })?;
    Parser::new(&tokens).parse_statement()
}
