use super::{quote_identifier, Error, Result};
use crate::differential_privacy::{self, BudgetStore, MaxLookup, PrivacyPrincipal};
use rusqlite::{self, params, Connection, OptionalExtension};

const BUDGET_TABLE: &str = "privacy_budget";

/// Converts sqlite errors to io errors
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::database(err)
    }
}

/// Looks up `MAX(column)` in a table
#[derive(Debug)]
pub struct MaxLookupTable {
    connection: Connection,
    table: String,
}

impl MaxLookupTable {
    pub fn new(connection: Connection, table: &str) -> Result<Self> {
        Ok(MaxLookupTable {
            connection,
            table: quote_identifier(table)?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn try_max(&self, column: &str) -> Result<Option<f64>> {
        let query = format!("SELECT MAX({}) FROM {}", quote_identifier(column)?, self.table);
        Ok(self
            .connection
            .query_row(&query, [], |row| row.get::<_, Option<f64>>(0))?)
    }
}

impl MaxLookup for MaxLookupTable {
    fn max(&self, column: &str) -> Option<f64> {
        self.try_max(column)
            .map_err(|err| log::warn!("Cannot look up the maximum of {column}: {err}"))
            .ok()
            .flatten()
    }
}

/// Persists principals in a `privacy_budget` table
#[derive(Debug)]
pub struct Database {
    connection: Connection,
}

impl Database {
    pub fn new(connection: Connection) -> Result<Self> {
        connection.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {BUDGET_TABLE} (
                    id TEXT PRIMARY KEY,
                    initial_budget REAL NOT NULL,
                    remaining_budget REAL NOT NULL
                )"
            ),
            (),
        )?;
        Ok(Database { connection })
    }

    pub fn open_in_memory() -> Result<Self> {
        Database::new(Connection::open_in_memory()?)
    }

    fn try_load(&self, id: &str) -> Result<Option<PrivacyPrincipal>> {
        let row = self
            .connection
            .query_row(
                &format!("SELECT initial_budget, remaining_budget FROM {BUDGET_TABLE} WHERE id = ?1"),
                params![id],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
            )
            .optional()?;
        row.map(|(initial, remaining)| -> Result<PrivacyPrincipal> {
            Ok(PrivacyPrincipal::new(id, initial)?.with_remaining(remaining)?)
        })
        .transpose()
    }

    fn try_store(&self, principal: &PrivacyPrincipal) -> Result<()> {
        self.connection.execute(
            &format!(
                "INSERT INTO {BUDGET_TABLE} (id, initial_budget, remaining_budget) VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    initial_budget = excluded.initial_budget,
                    remaining_budget = excluded.remaining_budget"
            ),
            params![
                principal.id(),
                principal.initial_budget(),
                principal.remaining_budget()
            ],
        )?;
        Ok(())
    }
}

impl BudgetStore for Database {
    fn load(&self, id: &str) -> differential_privacy::Result<Option<PrivacyPrincipal>> {
        Ok(self.try_load(id)?)
    }

    fn store(&mut self, principal: &PrivacyPrincipal) -> differential_privacy::Result<()> {
        Ok(self.try_store(principal)?)
    }
}
