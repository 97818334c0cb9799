//! Storage connection traits.
//!
//! The engine consumes storage behind two seams:
//!
//! - [`Connection`] - predicate lookups, joined lookups, and row writes
//! - [`TransactionOps`] - the unit-of-work primitive used by write-through
//!   assignment
//!
//! All operations integrate with asupersync's structured concurrency via a
//! `Cx` context for cancellation and timeout handling.

use std::future::Future;

use asupersync::{Cx, Outcome};

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    #[must_use]
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Escapes embedded quote characters by doubling them.
    #[must_use]
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{escaped}\"")
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{escaped}`")
            }
        }
    }

    /// Quote a `table.column` reference.
    #[must_use]
    pub fn quote_qualified(self, table: &str, column: &str) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }
}

/// A storage connection capable of executing lookups and writes.
///
/// All operations are async and take a `Cx` context. Implementations must
/// be `Send + Sync` for use across async boundaries.
pub trait Connection: Send + Sync {
    /// The transaction type returned by this connection.
    type Tx<'conn>: TransactionOps
    where
        Self: 'conn;

    /// The SQL dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a lookup and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a lookup and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Execute a write statement and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute an INSERT and return the inserted key.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Begin a transaction.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send;

    /// Close the connection gracefully.
    fn close(self, cx: &Cx) -> impl Future<Output = crate::error::Result<()>> + Send;
}

/// Trait for transaction operations.
///
/// Transactions must be explicitly committed or rolled back; the engine
/// never leaves one open across a public call.
pub trait TransactionOps: Send {
    /// Execute a lookup within this transaction.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a write statement within this transaction.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Commit, making all changes permanent.
    fn commit(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Rollback, discarding all changes.
    fn rollback(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_by_dialect() {
        assert_eq!(Dialect::Postgres.placeholder(1), "$1");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::Mysql.placeholder(3), "?");
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(Dialect::Postgres.quote_identifier("clubs"), "\"clubs\"");
        assert_eq!(
            Dialect::Postgres.quote_identifier("we\"ird"),
            "\"we\"\"ird\""
        );
        assert_eq!(Dialect::Mysql.quote_identifier("clubs"), "`clubs`");
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(
            Dialect::Postgres.quote_qualified("clubs", "name"),
            "\"clubs\".\"name\""
        );
    }
}
