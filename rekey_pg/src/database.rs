use async_trait::async_trait;
use rekey_core::Database;
use sqlx::postgres::PgConnection;
use sqlx::{Executor, PgPool, Postgres, Row};

const PRIMARY_KEY_SQL: &str = r#"
    SELECT kcu.column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_name = tc.constraint_name
     AND kcu.table_schema = tc.table_schema
    WHERE tc.constraint_type = 'PRIMARY KEY'
      AND tc.table_name = $1
    ORDER BY kcu.ordinal_position
"#;

const TABLE_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)";

async fn fetch_values<'e, E>(executor: E, sql: &str) -> Result<Vec<String>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(sql).fetch_all(executor).await?;
    rows.iter().map(|row| row.try_get(0)).collect()
}

async fn fetch_primary_key<'e, E>(executor: E, table: &str) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(PRIMARY_KEY_SQL)
        .bind(table)
        .fetch_all(executor)
        .await?;
    // A composite key reports more than one column; callers treat that the
    // same as no key at all.
    match rows.as_slice() {
        [row] => row.try_get(0).map(Some),
        _ => Ok(None),
    }
}

async fn fetch_table_exists<'e, E>(executor: E, table: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(TABLE_EXISTS_SQL)
        .bind(table)
        .fetch_one(executor)
        .await?;
    row.try_get(0)
}

/// The rekey database capability over a borrowed Postgres connection.
///
/// This is the shape a host migration provides: one connection inside one
/// transaction. A `sqlx::Transaction` dereferences to `PgConnection`, so a
/// transactional run is `PgDatabase::new(&mut tx)`.
pub struct PgDatabase<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgDatabase<'c> {
    /// Borrows a connection (or a transaction, through deref) for one run.
    pub fn new(conn: &'c mut PgConnection) -> Self {
        log::debug!("Creating a new PgDatabase");
        Self { conn }
    }
}

#[async_trait]
impl Database for PgDatabase<'_> {
    type Error = sqlx::Error;

    async fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        Ok(sqlx::query(sql)
            .execute(&mut *self.conn)
            .await?
            .rows_affected())
    }

    async fn query_values(&mut self, sql: &str) -> Result<Vec<String>, sqlx::Error> {
        fetch_values(&mut *self.conn, sql).await
    }

    async fn primary_key_name(&mut self, table: &str) -> Result<Option<String>, sqlx::Error> {
        fetch_primary_key(&mut *self.conn, table).await
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool, sqlx::Error> {
        fetch_table_exists(&mut *self.conn, table).await
    }
}

/// The rekey database capability over a connection pool.
///
/// Each statement runs on its own pooled connection in autocommit mode, so
/// there is no enclosing transaction to roll back on failure. Prefer
/// [`PgDatabase`] for real migrations; this backend suits development
/// databases and scratch schemas.
#[derive(Clone, Debug)]
pub struct PgPoolDatabase {
    pool: PgPool,
}

impl PgPoolDatabase {
    /// Creates a pool-backed database.
    pub fn new(pool: PgPool) -> Self {
        log::debug!("Creating a new PgPoolDatabase");
        Self { pool }
    }
}

#[async_trait]
impl Database for PgPoolDatabase {
    type Error = sqlx::Error;

    async fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        Ok(sqlx::query(sql).execute(&self.pool).await?.rows_affected())
    }

    async fn query_values(&mut self, sql: &str) -> Result<Vec<String>, sqlx::Error> {
        fetch_values(&self.pool, sql).await
    }

    async fn primary_key_name(&mut self, table: &str) -> Result<Option<String>, sqlx::Error> {
        fetch_primary_key(&self.pool, table).await
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool, sqlx::Error> {
        fetch_table_exists(&self.pool, table).await
    }
}
