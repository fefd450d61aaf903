use std::iter::Peekable;
use std::vec::IntoIter;

use self::ast::{BinaryOperator, ColumnDefinition, Expr, Projection, Statement};
use self::token::{tokenize, Keyword, Token};
use crate::error::{DbError, Result};
use crate::row::value::DataType;

pub mod ast;
mod token;

/// Parses one SQL statement. This is a thin adapter in front of the
/// engine; it accepts exactly the statement shapes the executor backs.
pub fn parse_sql(sql: &str) -> Result<Statement> {
    let mut parser = Parser::new(sql)?;
    let statement = parser.parse_statement()?;
    parser.expect_end()?;
    Ok(statement)
}

struct Parser {
    tokens: Peekable<IntoIter<Token>>,
}

impl Parser {
    fn new(sql: &str) -> Result<Self> {
        let tokens = tokenize(sql)?;
        Ok(Self {
            tokens: tokens.into_iter().peekable(),
        })
    }

    fn next_token(&mut self) -> Token {
        self.tokens.next().unwrap_or(Token::End)
    }

    fn peek_token(&mut self) -> &Token {
        self.tokens.peek().unwrap_or(&Token::End)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.next_token() {
            Token::Keyword(keyword) => match keyword {
                Keyword::Create => self.parse_create_statement(),
                Keyword::Drop => self.parse_drop_statement(),
                Keyword::Show => self.parse_show_statement(),
                Keyword::Insert => self.parse_insert_statement(),
                Keyword::Delete => self.parse_delete_statement(),
                Keyword::Select => self.parse_select_statement(),
                found => self.wrong_keyword("a statement", found)?,
            },
            found => self.wrong_token("a statement", found)?,
        }
    }

    fn parse_create_statement(&mut self) -> Result<Statement> {
        match self.next_token() {
            Token::Keyword(Keyword::Table) => self.parse_create_table_statement(),
            Token::Keyword(Keyword::Index) => self.parse_create_index_statement(),
            found => self.wrong_token("TABLE or INDEX", found)?,
        }
    }

    fn parse_create_table_statement(&mut self) -> Result<Statement> {
        let if_not_exists = if self.peek_token() == &Token::Keyword(Keyword::If) {
            self.next_token();
            self.expect(Token::Keyword(Keyword::Not))?;
            self.expect(Token::Keyword(Keyword::Exists))?;
            true
        } else {
            false
        };
        let name = self.parse_identifier()?;

        self.expect(Token::LeftParen)?;
        let mut columns = vec![];
        loop {
            columns.push(self.parse_column_definition()?);
            match self.next_token() {
                Token::Comma => continue,
                Token::RightParen => break,
                found => self.wrong_token("')' or ',' after a column definition", found)?,
            }
        }

        Ok(Statement::CreateTable {
            name,
            if_not_exists,
            columns,
        })
    }

    fn parse_column_definition(&mut self) -> Result<ColumnDefinition> {
        let name = self.parse_identifier()?;
        let data_type = match self.next_token() {
            Token::Keyword(Keyword::Int) => DataType::Int,
            Token::Keyword(Keyword::Text) => DataType::Text,
            Token::Keyword(Keyword::Double) => DataType::Double,
            found => self.wrong_token("a column type", found)?,
        };
        Ok(ColumnDefinition { name, data_type })
    }

    fn parse_create_index_statement(&mut self) -> Result<Statement> {
        let name = self.parse_identifier()?;
        self.expect(Token::Keyword(Keyword::On))?;
        let table = self.parse_identifier()?;
        let columns = self.parse_identifier_list()?;

        let index_type = if self.peek_token() == &Token::Keyword(Keyword::Using) {
            self.next_token();
            let using = self.parse_identifier()?;
            match using.as_str() {
                "btree" => "BTREE".to_owned(),
                "hash" => "HASH".to_owned(),
                other => {
                    return Err(DbError::exec(format!("unknown index type {}", other)));
                }
            }
        } else {
            "BTREE".to_owned()
        };

        Ok(Statement::CreateIndex {
            name,
            table,
            columns,
            index_type,
        })
    }

    fn parse_drop_statement(&mut self) -> Result<Statement> {
        match self.next_token() {
            Token::Keyword(Keyword::Table) => Ok(Statement::DropTable {
                name: self.parse_identifier()?,
            }),
            Token::Keyword(Keyword::Index) => {
                let name = self.parse_identifier()?;
                self.expect(Token::Keyword(Keyword::From))?;
                let table = self.parse_identifier()?;
                Ok(Statement::DropIndex { name, table })
            }
            found => self.wrong_token("TABLE or INDEX", found)?,
        }
    }

    fn parse_show_statement(&mut self) -> Result<Statement> {
        match self.next_token() {
            Token::Keyword(Keyword::Tables) => Ok(Statement::ShowTables),
            Token::Keyword(Keyword::Columns) => {
                self.expect(Token::Keyword(Keyword::From))?;
                Ok(Statement::ShowColumns {
                    table: self.parse_identifier()?,
                })
            }
            Token::Keyword(Keyword::Index) => {
                self.expect(Token::Keyword(Keyword::From))?;
                Ok(Statement::ShowIndex {
                    table: self.parse_identifier()?,
                })
            }
            found => self.wrong_token("TABLES, COLUMNS or INDEX", found)?,
        }
    }

    fn parse_insert_statement(&mut self) -> Result<Statement> {
        self.expect(Token::Keyword(Keyword::Into))?;
        let table = self.parse_identifier()?;

        let columns = if self.peek_token() == &Token::LeftParen {
            Some(self.parse_identifier_list()?)
        } else {
            None
        };

        self.expect(Token::Keyword(Keyword::Values))?;
        self.expect(Token::LeftParen)?;
        let mut values = vec![];
        loop {
            values.push(self.parse_primary_expression()?);
            match self.next_token() {
                Token::Comma => continue,
                Token::RightParen => break,
                found => self.wrong_token("')' or ',' after a value", found)?,
            }
        }

        Ok(Statement::Insert {
            table,
            columns,
            values,
        })
    }

    fn parse_delete_statement(&mut self) -> Result<Statement> {
        self.expect(Token::Keyword(Keyword::From))?;
        let table = self.parse_identifier()?;
        let filter = self.parse_optional_where()?;
        Ok(Statement::Delete { table, filter })
    }

    fn parse_select_statement(&mut self) -> Result<Statement> {
        let mut projections = vec![];
        loop {
            let projection = match self.peek_token() {
                Token::Star => {
                    self.next_token();
                    Projection::Wildcard
                }
                _ => Projection::Column(self.parse_identifier()?),
            };
            projections.push(projection);
            if self.peek_token() == &Token::Comma {
                self.next_token();
            } else {
                break;
            }
        }

        self.expect(Token::Keyword(Keyword::From))?;
        let table = self.parse_identifier()?;
        let filter = self.parse_optional_where()?;

        Ok(Statement::Select {
            projections,
            table,
            filter,
        })
    }

    fn parse_optional_where(&mut self) -> Result<Option<Expr>> {
        if self.peek_token() == &Token::Keyword(Keyword::Where) {
            self.next_token();
            Ok(Some(self.parse_expression()?))
        } else {
            Ok(None)
        }
    }

    /// AND/OR over comparisons, left-associative.
    fn parse_expression(&mut self) -> Result<Expr> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.peek_token() {
                Token::Keyword(Keyword::And) => BinaryOperator::And,
                Token::Keyword(Keyword::Or) => BinaryOperator::Or,
                _ => return Ok(expr),
            };
            self.next_token();
            let right = self.parse_comparison()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_primary_expression()?;
        let op = match self.peek_token() {
            Token::Eq => BinaryOperator::Eq,
            Token::NotEq => BinaryOperator::NotEq,
            Token::Less => BinaryOperator::Less,
            Token::LessEq => BinaryOperator::LessEq,
            Token::Greater => BinaryOperator::Greater,
            Token::GreaterEq => BinaryOperator::GreaterEq,
            _ => return Ok(left),
        };
        self.next_token();
        let right = self.parse_primary_expression()?;
        Ok(Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_primary_expression(&mut self) -> Result<Expr> {
        match self.next_token() {
            Token::Identifier(s) => Ok(Expr::Identifier(s)),
            Token::Number(s) => Ok(Expr::Number(s)),
            Token::Minus => match self.next_token() {
                Token::Number(s) => Ok(Expr::Number(format!("-{}", s))),
                found => self.wrong_token("a number after '-'", found)?,
            },
            Token::QuotedString(s) => Ok(Expr::String(s)),
            Token::Keyword(Keyword::True) => Ok(Expr::Boolean(true)),
            Token::Keyword(Keyword::False) => Ok(Expr::Boolean(false)),
            found => self.wrong_token("an expression", found)?,
        }
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<String>> {
        self.expect(Token::LeftParen)?;
        let mut identifiers = vec![];
        loop {
            identifiers.push(self.parse_identifier()?);
            match self.next_token() {
                Token::Comma => continue,
                Token::RightParen => break,
                found => self.wrong_token("')' or ',' after an identifier", found)?,
            }
        }
        Ok(identifiers)
    }

    fn parse_identifier(&mut self) -> Result<String> {
        match self.next_token() {
            Token::Identifier(s) => Ok(s),
            found => self.wrong_token("an identifier", found)?,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let token = self.next_token();
        if token != expected {
            return Err(DbError::exec(format!(
                "expected {:?}, found {:?}",
                expected, token
            )));
        }
        Ok(())
    }

    fn expect_end(&mut self) -> Result<()> {
        // a trailing semicolon is allowed
        if self.peek_token() == &Token::Semicolon {
            self.next_token();
        }
        match self.next_token() {
            Token::End => Ok(()),
            found => self.wrong_token("end of statement", found)?,
        }
    }

    fn wrong_token<T>(&self, expected: &str, found: Token) -> Result<T> {
        Err(DbError::exec(format!(
            "expected {}, found {:?}",
            expected, found
        )))
    }

    fn wrong_keyword<T>(&self, expected: &str, found: Keyword) -> Result<T> {
        Err(DbError::exec(format!(
            "expected {}, found keyword {:?}",
            expected, found
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::ast::{BinaryOperator, ColumnDefinition, Expr, Projection, Statement};
    use super::parse_sql;
    use crate::row::value::DataType;

    #[test]
    fn can_parse_create_table() {
        let statement = parse_sql("CREATE TABLE foo (id INT, data TEXT)").unwrap();
        assert_eq!(
            statement,
            Statement::CreateTable {
                name: "foo".to_owned(),
                if_not_exists: false,
                columns: vec![
                    ColumnDefinition {
                        name: "id".to_owned(),
                        data_type: DataType::Int,
                    },
                    ColumnDefinition {
                        name: "data".to_owned(),
                        data_type: DataType::Text,
                    },
                ],
            }
        );
    }

    #[test]
    fn can_parse_create_table_if_not_exists() {
        let statement = parse_sql("CREATE TABLE IF NOT EXISTS foo (id INT)").unwrap();
        match statement {
            Statement::CreateTable { if_not_exists, .. } => assert!(if_not_exists),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn can_parse_create_index() {
        let statement = parse_sql("CREATE INDEX fx ON foo (id)").unwrap();
        assert_eq!(
            statement,
            Statement::CreateIndex {
                name: "fx".to_owned(),
                table: "foo".to_owned(),
                columns: vec!["id".to_owned()],
                index_type: "BTREE".to_owned(),
            }
        );

        let statement = parse_sql("CREATE INDEX hx ON foo (id, data) USING HASH").unwrap();
        assert_eq!(
            statement,
            Statement::CreateIndex {
                name: "hx".to_owned(),
                table: "foo".to_owned(),
                columns: vec!["id".to_owned(), "data".to_owned()],
                index_type: "HASH".to_owned(),
            }
        );
    }

    #[test]
    fn can_parse_drop_and_show() {
        assert_eq!(
            parse_sql("DROP TABLE foo").unwrap(),
            Statement::DropTable {
                name: "foo".to_owned()
            }
        );
        assert_eq!(
            parse_sql("DROP INDEX fx FROM foo").unwrap(),
            Statement::DropIndex {
                name: "fx".to_owned(),
                table: "foo".to_owned()
            }
        );
        assert_eq!(parse_sql("SHOW TABLES").unwrap(), Statement::ShowTables);
        assert_eq!(
            parse_sql("SHOW COLUMNS FROM _tables").unwrap(),
            Statement::ShowColumns {
                table: "_tables".to_owned()
            }
        );
        assert_eq!(
            parse_sql("SHOW INDEX FROM foo").unwrap(),
            Statement::ShowIndex {
                table: "foo".to_owned()
            }
        );
    }

    #[test]
    fn can_parse_insert() {
        let statement = parse_sql("INSERT INTO foo (id, data) VALUES (1, \"one\")").unwrap();
        assert_eq!(
            statement,
            Statement::Insert {
                table: "foo".to_owned(),
                columns: Some(vec!["id".to_owned(), "data".to_owned()]),
                values: vec![
                    Expr::Number("1".to_owned()),
                    Expr::String("one".to_owned())
                ],
            }
        );

        let statement = parse_sql("INSERT INTO foo VALUES (-3, 'minus three')").unwrap();
        assert_eq!(
            statement,
            Statement::Insert {
                table: "foo".to_owned(),
                columns: None,
                values: vec![
                    Expr::Number("-3".to_owned()),
                    Expr::String("minus three".to_owned())
                ],
            }
        );
    }

    #[test]
    fn can_parse_select_with_conjunction() {
        let statement = parse_sql("SELECT * FROM foo WHERE id=99 AND data=\"nine\"").unwrap();
        let expected_filter = Expr::Binary {
            left: Box::new(Expr::Binary {
                left: Box::new(Expr::Identifier("id".to_owned())),
                op: BinaryOperator::Eq,
                right: Box::new(Expr::Number("99".to_owned())),
            }),
            op: BinaryOperator::And,
            right: Box::new(Expr::Binary {
                left: Box::new(Expr::Identifier("data".to_owned())),
                op: BinaryOperator::Eq,
                right: Box::new(Expr::String("nine".to_owned())),
            }),
        };
        assert_eq!(
            statement,
            Statement::Select {
                projections: vec![Projection::Wildcard],
                table: "foo".to_owned(),
                filter: Some(expected_filter),
            }
        );
    }

    #[test]
    fn can_parse_projected_select_and_delete() {
        assert_eq!(
            parse_sql("SELECT id, data FROM foo;").unwrap(),
            Statement::Select {
                projections: vec![
                    Projection::Column("id".to_owned()),
                    Projection::Column("data".to_owned())
                ],
                table: "foo".to_owned(),
                filter: None,
            }
        );
        assert_eq!(
            parse_sql("DELETE FROM foo WHERE id=1").unwrap(),
            Statement::Delete {
                table: "foo".to_owned(),
                filter: Some(Expr::Binary {
                    left: Box::new(Expr::Identifier("id".to_owned())),
                    op: BinaryOperator::Eq,
                    right: Box::new(Expr::Number("1".to_owned())),
                }),
            }
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_sql("FROB THE WIDGET").is_err());
        assert!(parse_sql("SELECT * FROM foo extra tokens").is_err());
        assert!(parse_sql("CREATE TABLE foo (id INT").is_err());
    }
}
