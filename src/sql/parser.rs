// SQL parser - recursive descent over the token stream

use super::ast::*;
use super::lexer::Lexer;
use super::token::Token;
use crate::access::value::DataType;
use crate::error::{Error, Result};

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    parameters_seen: usize,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        Parser {
            tokens: Lexer::new(input).tokenize(),
            position: 0,
            parameters_seen: 0,
        }
    }

    /// Parse a single statement, requiring the input to end after it.
    pub fn parse(&mut self) -> Result<Statement> {
        let statement = match self.peek() {
            Token::Create => self.parse_create_table(),
            Token::Drop => self.parse_drop_table(),
            Token::Insert => self.parse_insert(),
            Token::Select => self.parse_select(),
            Token::Delete => self.parse_delete(),
            Token::Begin => {
                self.advance();
                Ok(Statement::Begin)
            }
            Token::Commit => {
                self.advance();
                Ok(Statement::Commit)
            }
            Token::Rollback => {
                self.advance();
                Ok(Statement::Rollback)
            }
            other => Err(Error::Syntax(format!(
                "statement cannot start with {other:?}"
            ))),
        }?;

        if *self.peek() == Token::Semicolon {
            self.advance();
        }
        match self.peek() {
            Token::Eof => Ok(statement),
            other => Err(Error::Syntax(format!(
                "unexpected {other:?} after the statement"
            ))),
        }
    }

    fn parse_create_table(&mut self) -> Result<Statement> {
        self.expect(Token::Create)?;
        self.expect(Token::Table)?;
        let table_name = self.expect_identifier()?;

        self.expect(Token::LeftParen)?;
        let mut columns = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            let data_type = self.parse_data_type()?;
            let primary_key = if *self.peek() == Token::Primary {
                self.advance();
                self.expect(Token::Key)?;
                true
            } else {
                false
            };
            columns.push(ColumnDefinition {
                name,
                data_type,
                primary_key,
            });

            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RightParen)?;

        Ok(Statement::CreateTable(CreateTableStatement {
            table_name,
            columns,
        }))
    }

    fn parse_drop_table(&mut self) -> Result<Statement> {
        self.expect(Token::Drop)?;
        self.expect(Token::Table)?;
        let table_name = self.expect_identifier()?;
        Ok(Statement::DropTable(DropTableStatement { table_name }))
    }

    fn parse_insert(&mut self) -> Result<Statement> {
        self.expect(Token::Insert)?;
        self.expect(Token::Into)?;
        let table_name = self.expect_identifier()?;

        let columns = if *self.peek() == Token::LeftParen {
            self.advance();
            let mut names = Vec::new();
            loop {
                names.push(self.expect_identifier()?);
                if *self.peek() == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(Token::RightParen)?;
            Some(names)
        } else {
            None
        };

        self.expect(Token::Values)?;
        let mut rows = Vec::new();
        loop {
            self.expect(Token::LeftParen)?;
            let mut row = Vec::new();
            loop {
                row.push(self.parse_literal()?);
                if *self.peek() == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(Token::RightParen)?;
            rows.push(row);

            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }

        Ok(Statement::Insert(InsertStatement {
            table_name,
            columns,
            rows,
        }))
    }

    fn parse_select(&mut self) -> Result<Statement> {
        self.expect(Token::Select)?;

        let mut projections = Vec::new();
        loop {
            match self.peek().clone() {
                Token::Star => {
                    self.advance();
                    projections.push(SelectItem::AllColumns);
                }
                Token::Identifier(name) => {
                    self.advance();
                    projections.push(SelectItem::Column(name));
                }
                other => {
                    return Err(Error::Syntax(format!(
                        "expected a column or *, found {other:?}"
                    )))
                }
            }
            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }

        self.expect(Token::From)?;
        let table_name = self.expect_identifier()?;
        let where_clause = self.parse_optional_where()?;

        Ok(Statement::Select(SelectStatement {
            projections,
            table_name,
            where_clause,
        }))
    }

    fn parse_delete(&mut self) -> Result<Statement> {
        self.expect(Token::Delete)?;
        self.expect(Token::From)?;
        let table_name = self.expect_identifier()?;
        let where_clause = self.parse_optional_where()?;
        Ok(Statement::Delete(DeleteStatement {
            table_name,
            where_clause,
        }))
    }

    fn parse_optional_where(&mut self) -> Result<Option<Expression>> {
        if *self.peek() != Token::Where {
            return Ok(None);
        }
        self.advance();
        Ok(Some(self.parse_expression()?))
    }

    /// Conjunction of comparisons: `a = 1 AND b BETWEEN 2 AND 5 AND ...`
    fn parse_expression(&mut self) -> Result<Expression> {
        let mut left = self.parse_comparison()?;
        while *self.peek() == Token::And {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let column = self.expect_identifier()?;

        if *self.peek() == Token::Between {
            self.advance();
            let low = self.parse_literal()?;
            self.expect(Token::And)?;
            let high = self.parse_literal()?;
            return Ok(Expression::Between { column, low, high });
        }

        let op = match self.peek() {
            Token::Equal => CompareOp::Eq,
            Token::NotEqual => CompareOp::NotEq,
            Token::Less => CompareOp::Lt,
            Token::LessEqual => CompareOp::LtEq,
            Token::Greater => CompareOp::Gt,
            Token::GreaterEqual => CompareOp::GtEq,
            other => {
                return Err(Error::Syntax(format!(
                    "expected a comparison operator, found {other:?}"
                )))
            }
        };
        self.advance();
        let value = self.parse_literal()?;
        Ok(Expression::Comparison { column, op, value })
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        let negative = if *self.peek() == Token::Minus {
            self.advance();
            true
        } else {
            false
        };

        let literal = match self.peek().clone() {
            Token::Number(text) => {
                self.advance();
                if text.contains('.') {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| Error::Syntax(format!("bad number literal {text}")))?;
                    Literal::Real(if negative { -value } else { value })
                } else {
                    let value: i64 = text
                        .parse()
                        .map_err(|_| Error::Syntax(format!("bad number literal {text}")))?;
                    Literal::Integer(if negative { -value } else { value })
                }
            }
            token if negative => {
                return Err(Error::Syntax(format!(
                    "expected a number after -, found {token:?}"
                )))
            }
            Token::String(text) => {
                self.advance();
                Literal::String(text)
            }
            Token::Null => {
                self.advance();
                Literal::Null
            }
            Token::True => {
                self.advance();
                Literal::Boolean(true)
            }
            Token::False => {
                self.advance();
                Literal::Boolean(false)
            }
            Token::Question => {
                self.advance();
                let index = self.parameters_seen;
                self.parameters_seen += 1;
                Literal::Parameter(index)
            }
            other => return Err(Error::Syntax(format!("expected a value, found {other:?}"))),
        };
        Ok(literal)
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        let data_type = match self.peek() {
            Token::Int | Token::Integer => DataType::Integer,
            Token::Real => DataType::Real,
            Token::Text => DataType::Text,
            Token::Boolean => DataType::Boolean,
            other => {
                return Err(Error::Syntax(format!(
                    "expected a column type, found {other:?}"
                )))
            }
        };
        self.advance();
        Ok(data_type)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(Error::Syntax(format!(
                "expected {expected:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(Error::Syntax(format!(
                "expected an identifier, found {other:?}"
            ))),
        }
    }
}
