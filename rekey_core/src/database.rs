//! The database capability the conversion core drives.

use async_trait::async_trait;

/// The narrow database surface a conversion run executes against.
///
/// One implementation is expected to wrap the host migration's connection or
/// transaction; the core issues standard DDL (`ALTER TABLE`, `ADD`/`DROP
/// COLUMN`) and DML (`UPDATE ... SET ... FROM ... WHERE`), one statement at a
/// time, awaited in order. The target engine must offer a UUID column type
/// and a join-capable `UPDATE ... FROM` construct.
///
/// There is no retry logic anywhere above this trait: an error from any
/// method aborts the run, and recovery is the host transaction's
/// all-or-nothing rollback.
#[async_trait]
pub trait Database: Send {
    /// Error surfaced verbatim when a statement is rejected.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Executes a DDL/DML statement, returning the number of rows affected.
    async fn execute(&mut self, sql: &str) -> Result<u64, Self::Error>;

    /// Runs a query producing a single column, as text, in result order.
    async fn query_values(&mut self, sql: &str) -> Result<Vec<String>, Self::Error>;

    /// The table's primary-key column, when it has exactly one.
    ///
    /// `None` covers both a missing primary key and a composite one;
    /// composite keys are out of scope for conversion.
    async fn primary_key_name(&mut self, table: &str) -> Result<Option<String>, Self::Error>;

    /// Whether a table with this name exists.
    async fn table_exists(&mut self, table: &str) -> Result<bool, Self::Error>;
}
