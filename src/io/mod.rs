//! # Storage adapters
//!
//! The core never queries storage itself, it consumes capabilities:
//! a [`crate::differential_privacy::MaxLookup`] and a
//! [`crate::differential_privacy::BudgetStore`].
//! For now supports:
//! - SQLite using the ["sqlite"] feature.
//!

#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::differential_privacy;
use std::{error, fmt, result};

// Error management
#[derive(Debug)]
pub enum Error {
    Database(String),
    InvalidIdentifier(String),
    Other(String),
}

impl Error {
    pub fn database(database: impl fmt::Display) -> Error {
        Error::Database(format!("Database error {}", database))
    }
    pub fn invalid_identifier(identifier: impl fmt::Display) -> Error {
        Error::InvalidIdentifier(format!("Invalid identifier {}", identifier))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(format!("{}", desc))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Database(database) => writeln!(f, "Database: {}", database),
            Error::InvalidIdentifier(identifier) => writeln!(f, "InvalidIdentifier: {}", identifier),
            Error::Other(desc) => writeln!(f, "{}", desc),
        }
    }
}

impl error::Error for Error {}

impl From<differential_privacy::Error> for Error {
    fn from(err: differential_privacy::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<Error> for differential_privacy::Error {
    fn from(err: Error) -> Self {
        differential_privacy::Error::Other(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Quote a table or column name, accepting only plain identifiers
pub fn quote_identifier(identifier: &str) -> Result<String> {
    let plain = !identifier.is_empty()
        && !identifier.starts_with(|c: char| c.is_ascii_digit())
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        Ok(format!("\"{identifier}\""))
    } else {
        Err(Error::invalid_identifier(identifier))
    }
}
