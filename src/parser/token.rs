use std::iter::{Enumerate, Peekable};
use std::str::{Chars, FromStr};

use crate::error::{DbError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    And,
    Columns,
    Create,
    Delete,
    Double,
    Drop,
    Exists,
    False,
    From,
    If,
    Index,
    Insert,
    Int,
    Into,
    Not,
    On,
    Or,
    Select,
    Show,
    Table,
    Tables,
    Text,
    True,
    Using,
    Values,
    Where,
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let res = match s {
            "and" => Self::And,
            "columns" => Self::Columns,
            "create" => Self::Create,
            "delete" => Self::Delete,
            "double" => Self::Double,
            "drop" => Self::Drop,
            "exists" => Self::Exists,
            "false" => Self::False,
            "from" => Self::From,
            "if" => Self::If,
            "index" => Self::Index,
            "insert" => Self::Insert,
            "int" | "integer" => Self::Int,
            "into" => Self::Into,
            "not" => Self::Not,
            "on" => Self::On,
            "or" => Self::Or,
            "select" => Self::Select,
            "show" => Self::Show,
            "table" => Self::Table,
            "tables" => Self::Tables,
            "text" => Self::Text,
            "true" => Self::True,
            "using" => Self::Using,
            "values" => Self::Values,
            "where" => Self::Where,
            _ => return Err(()),
        };
        Ok(res)
    }
}

#[derive(Debug, PartialEq)]
pub enum Token {
    /// an SQL identifier
    Identifier(String),
    /// a keyword (e.g. CREATE)
    Keyword(Keyword),
    /// a number, like 123
    Number(String),
    /// a quoted string (single or double quotes)
    QuotedString(String),
    /// Comma ','
    Comma,
    /// Left parenthesis '('
    LeftParen,
    /// Right parenthesis ')'
    RightParen,
    /// Semicolon ';'
    Semicolon,
    /// star '*'
    Star,
    /// Minus '-'
    Minus,
    /// Equal '='
    Eq,
    /// Not equal (either '<>' or '!=')
    NotEq,
    /// Less than '<'
    Less,
    /// Greater than '>'
    Greater,
    /// Less than or equal '<='
    LessEq,
    /// Greater than or equal '>='
    GreaterEq,
    /// not a token, just end of query
    End,
}

struct Tokenizer<'a> {
    sql: &'a str,
    chars: Peekable<Enumerate<Chars<'a>>>,
}

impl<'a> Tokenizer<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            sql,
            chars: sql.chars().enumerate().peekable(),
        }
    }

    fn word(&mut self, start: usize) -> String {
        let mut end = start + 1;
        while let Some((pos, ch)) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || *ch == '_' {
                end = *pos + 1;
                self.chars.next();
            } else {
                break;
            }
        }
        self.sql[start..end].to_lowercase()
    }

    fn number(&mut self, start: usize) -> String {
        let mut end = start + 1;
        while let Some((pos, ch)) = self.chars.peek() {
            if ch.is_ascii_digit() {
                end = *pos + 1;
                self.chars.next();
            } else {
                break;
            }
        }
        self.sql[start..end].to_owned()
    }

    fn quoted_string(&mut self, start: usize, quote: char) -> Result<String> {
        for (pos, ch) in self.chars.by_ref() {
            if ch == quote {
                return Ok(self.sql[start..pos].to_owned());
            }
        }
        Err(DbError::exec(format!(
            "unterminated string literal {}",
            &self.sql[start..]
        )))
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        let token = match self.chars.next() {
            Some((pos, ch)) => match ch {
                ch if ch.is_whitespace() => return self.next_token(),
                '(' => Token::LeftParen,
                ')' => Token::RightParen,
                ';' => Token::Semicolon,
                ',' => Token::Comma,
                '*' => Token::Star,
                '-' => Token::Minus,
                '=' => Token::Eq,
                '!' => match self.chars.peek() {
                    Some((_pos, '=')) => {
                        self.chars.next();
                        Token::NotEq
                    }
                    _ => return Err(DbError::exec("unexpected character '!'")),
                },
                '<' => match self.chars.peek() {
                    Some((_pos, '>')) => {
                        self.chars.next();
                        Token::NotEq
                    }
                    Some((_pos, '=')) => {
                        self.chars.next();
                        Token::LessEq
                    }
                    _ => Token::Less,
                },
                '>' => match self.chars.peek() {
                    Some((_pos, '=')) => {
                        self.chars.next();
                        Token::GreaterEq
                    }
                    _ => Token::Greater,
                },
                quote @ ('\'' | '"') => Token::QuotedString(self.quoted_string(pos + 1, quote)?),
                'a'..='z' | 'A'..='Z' | '_' => {
                    let word = self.word(pos);
                    if let Ok(keyword) = Keyword::from_str(&word) {
                        Token::Keyword(keyword)
                    } else {
                        Token::Identifier(word)
                    }
                }
                '0'..='9' => Token::Number(self.number(pos)),
                ch => return Err(DbError::exec(format!("unexpected character '{}'", ch))),
            },
            None => return Ok(None),
        };

        Ok(Some(token))
    }
}

pub fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let mut tokens = vec![];
    let mut tokenizer = Tokenizer::new(sql);
    while let Some(token) = tokenizer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::{tokenize, Keyword, Token};

    #[test]
    fn can_tokenize_create_table_statement() {
        let sql = "CREATE TABLE foo (id INT, data TEXT)";
        let tokens = tokenize(sql).expect("Expected to tokenize without any errors");
        let expected = vec![
            Token::Keyword(Keyword::Create),
            Token::Keyword(Keyword::Table),
            Token::Identifier("foo".to_owned()),
            Token::LeftParen,
            Token::Identifier("id".to_owned()),
            Token::Keyword(Keyword::Int),
            Token::Comma,
            Token::Identifier("data".to_owned()),
            Token::Keyword(Keyword::Text),
            Token::RightParen,
        ];
        assert_eq!(tokens, expected);
    }

    #[test]
    fn can_tokenize_filtered_select() {
        let sql = "SELECT * FROM foo WHERE id=99 AND data=\"nine\"";
        let tokens = tokenize(sql).expect("Expected to tokenize without any errors");
        let expected = vec![
            Token::Keyword(Keyword::Select),
            Token::Star,
            Token::Keyword(Keyword::From),
            Token::Identifier("foo".to_owned()),
            Token::Keyword(Keyword::Where),
            Token::Identifier("id".to_owned()),
            Token::Eq,
            Token::Number("99".to_owned()),
            Token::Keyword(Keyword::And),
            Token::Identifier("data".to_owned()),
            Token::Eq,
            Token::QuotedString("nine".to_owned()),
        ];
        assert_eq!(tokens, expected);
    }

    #[test]
    fn both_quote_styles_delimit_strings() {
        assert_eq!(
            tokenize("'one'").unwrap(),
            vec![Token::QuotedString("one".to_owned())]
        );
        assert_eq!(
            tokenize("\"one\"").unwrap(),
            vec![Token::QuotedString("one".to_owned())]
        );
        assert!(tokenize("'unterminated").is_err());
    }

    #[test]
    fn can_tokenize_negative_numbers() {
        let tokens = tokenize("VALUES (-17)").unwrap();
        let expected = vec![
            Token::Keyword(Keyword::Values),
            Token::LeftParen,
            Token::Minus,
            Token::Number("17".to_owned()),
            Token::RightParen,
        ];
        assert_eq!(tokens, expected);
    }
}
