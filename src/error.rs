use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// A record plus its slot header does not fit in the targeted page.
    /// Recovered internally by appending to a fresh page.
    #[error("not enough room in block")]
    NoRoom,

    /// A single marshalled row exceeds the block size.
    #[error("row too large for a single block")]
    TooLarge,

    /// Schema or catalog violation.
    #[error("{0}")]
    Relation(String),

    /// Statement-level failure.
    #[error("{0}")]
    Exec(String),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// Underlying block store failure.
    #[error("{context}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl DbError {
    pub fn relation(msg: impl Into<String>) -> Self {
        DbError::Relation(msg.into())
    }

    pub fn exec(msg: impl Into<String>) -> Self {
        DbError::Exec(msg.into())
    }

    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        DbError::Storage {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;
