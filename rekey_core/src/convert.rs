//! The conversion run: staging, key rewriting, finalization.

use std::collections::BTreeMap;

use crate::database::Database;
use crate::encoder::uuid_cast_sql;
use crate::ledger::{StagedColumn, TransitoryColumns};
use crate::naming::{DefaultConvention, NamingConvention};
use crate::sql::{Ident, InvalidIdentifier, quote_literal};

/// Suffix appended to a column name to form its staged legacy twin.
const LEGACY_SUFFIX: &str = "_orig";

/// Default expression installed on converted primary keys for future rows.
const UUID_DEFAULT: &str = "gen_random_uuid()";

/// Errors surfaced by a conversion run.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError<E>
where
    E: std::error::Error,
{
    /// The table has no single-column primary key to convert.
    #[error("table {table} has no single-column primary key")]
    MissingPrimaryKey {
        /// The table that was inspected.
        table: String,
    },
    /// A table or column name failed identifier validation.
    #[error(transparent)]
    Identifier(#[from] InvalidIdentifier),
    /// The database rejected a statement; the backend error, verbatim.
    #[error("database error: {0}")]
    Database(E),
}

/// Options for a primary-key conversion.
#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyOptions {
    /// The key column; introspected when `None`.
    pub column: Option<String>,
    /// Default expression for future rows; `gen_random_uuid()` when `None`.
    pub default: Option<String>,
}

/// Drives one integer-to-UUID key conversion run over a borrowed database.
///
/// Statement ordering is load-bearing, not incidental: a table's primary key
/// must be converted before any foreign-key or polymorphic column that
/// references it, and [`drop_staged_columns`](Self::drop_staged_columns) must
/// come after every conversion in the whole run, because any staged legacy
/// column may still be the join target of a conversion that has not run yet.
///
/// The migrator owns the ledger of staged columns for exactly one run; it
/// never retries, and any statement failure propagates so the host can roll
/// back the enclosing transaction.
pub struct UuidMigrator<'a, DB: Database> {
    db: &'a mut DB,
    convention: Box<dyn NamingConvention>,
    staged: TransitoryColumns,
}

impl<'a, DB: Database> UuidMigrator<'a, DB> {
    /// Creates a migrator over the host's database with the stock naming
    /// convention.
    pub fn new(db: &'a mut DB) -> Self {
        Self::with_convention(db, DefaultConvention)
    }

    /// Creates a migrator with a custom naming convention.
    pub fn with_convention(db: &'a mut DB, convention: impl NamingConvention + 'static) -> Self {
        log::debug!("Creating a new UuidMigrator");
        Self {
            db,
            convention: Box::new(convention),
            staged: TransitoryColumns::new(),
        }
    }

    /// Read-only view of the staged legacy columns recorded so far.
    pub fn staged_columns(&self) -> &[StagedColumn] {
        self.staged.entries()
    }

    /// Converts `table`'s primary key to UUID.
    ///
    /// The key column is introspected, staged with a `gen_random_uuid()`
    /// default so future rows get freshly generated keys, and the orphaned
    /// auto-increment sequence is dropped if one exists.
    pub async fn convert_primary_key(
        &mut self,
        table: &str,
    ) -> Result<(), ConversionError<DB::Error>> {
        self.convert_primary_key_with(table, PrimaryKeyOptions::default())
            .await
    }

    /// [`convert_primary_key`](Self::convert_primary_key) with an explicit
    /// key column or default expression.
    pub async fn convert_primary_key_with(
        &mut self,
        table: &str,
        options: PrimaryKeyOptions,
    ) -> Result<(), ConversionError<DB::Error>> {
        let column = match options.column {
            Some(column) => column,
            None => self.require_primary_key(table).await?,
        };
        let default = options.default.as_deref().unwrap_or(UUID_DEFAULT);
        log::info!("Converting primary key {table}.{column} to uuid");
        self.stage_column(table, &column, Some(default)).await?;
        self.drop_sequence(table, &column).await;
        Ok(())
    }

    /// Converts a foreign-key column to UUID by joining the referenced
    /// table's staged legacy key.
    ///
    /// The referenced table is derived from the column name by the naming
    /// convention. When no such table exists the whole operation is a
    /// deliberate no-op: not every `_id`-suffixed integer column is a
    /// relationship. Otherwise the column is staged with no default (future
    /// rows are populated by application logic) and every row is pointed at
    /// the referenced table's new key. The referenced table's primary key
    /// must already have been converted in this run.
    pub async fn convert_foreign_key(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<(), ConversionError<DB::Error>> {
        let target = self.convention.foreign_key_table(column);
        if !self
            .db
            .table_exists(&target)
            .await
            .map_err(ConversionError::Database)?
        {
            log::warn!("Skipping {table}.{column}: no table named {target}");
            return Ok(());
        }
        let target_key = self.require_primary_key(&target).await?;
        log::info!("Converting foreign key {table}.{column} -> {target}.{target_key}");
        let legacy = self.stage_column(table, column, None).await?;
        self.rewrite_reference(table, column, &legacy, &target, &target_key, None)
            .await?;
        Ok(())
    }

    /// Applies [`convert_foreign_key`](Self::convert_foreign_key) to each
    /// column independently; order between columns is immaterial.
    pub async fn convert_foreign_keys(
        &mut self,
        table: &str,
        columns: &[&str],
    ) -> Result<(), ConversionError<DB::Error>> {
        for column in columns {
            self.convert_foreign_key(table, column).await?;
        }
        Ok(())
    }

    /// Derives the discriminator-to-table mapping for a polymorphic column
    /// from the values actually present in the data.
    ///
    /// Each distinct value of `type_column` is mapped through the naming
    /// convention; entries whose derived table does not exist are skipped.
    /// Schemas with non-conventional names must pass their mapping to
    /// [`convert_polymorphic_column_with`](Self::convert_polymorphic_column_with)
    /// instead.
    pub async fn infer_table_mapping(
        &mut self,
        table: &str,
        type_column: &str,
    ) -> Result<BTreeMap<String, String>, ConversionError<DB::Error>> {
        let table = Ident::new(table)?;
        let type_column = Ident::new(type_column)?;
        let sql = format!(
            "SELECT DISTINCT {type_column} FROM {table} \
             WHERE {type_column} IS NOT NULL ORDER BY {type_column}"
        );
        log::debug!("Executing: {sql}");
        let values = self
            .db
            .query_values(&sql)
            .await
            .map_err(ConversionError::Database)?;
        let mut mapping = BTreeMap::new();
        for value in values {
            let candidate = self.convention.discriminator_table(&value);
            // Discriminator values come from row data; a candidate that is
            // not a usable identifier is skipped, never quoted around.
            if Ident::new(&candidate).is_err() {
                log::warn!("Skipping discriminator {value:?}: derived name {candidate:?} is not an identifier");
                continue;
            }
            if self
                .db
                .table_exists(&candidate)
                .await
                .map_err(ConversionError::Database)?
            {
                mapping.insert(value, candidate);
            } else {
                log::warn!("Skipping discriminator {value:?}: no table named {candidate}");
            }
        }
        Ok(mapping)
    }

    /// Converts a polymorphic reference column using an explicit
    /// discriminator-to-table mapping.
    ///
    /// The column is staged with no default, then each mapped target is
    /// joined exactly as a direct foreign key would be, restricted to the
    /// rows whose discriminator selects that target. Every target's primary
    /// key must already have been converted in this run.
    pub async fn convert_polymorphic_column_with(
        &mut self,
        table: &str,
        id_column: &str,
        type_column: &str,
        mapping: &BTreeMap<String, String>,
    ) -> Result<(), ConversionError<DB::Error>> {
        log::info!(
            "Converting polymorphic column {table}.{id_column} across {} target(s)",
            mapping.len()
        );
        let legacy = self.stage_column(table, id_column, None).await?;
        for (value, target) in mapping {
            let target_key = self.require_primary_key(target).await?;
            self.rewrite_reference(
                table,
                id_column,
                &legacy,
                target,
                &target_key,
                Some((type_column, value.as_str())),
            )
            .await?;
        }
        Ok(())
    }

    /// Converts a polymorphic reference column, inferring the mapping from
    /// the discriminator values present.
    pub async fn convert_polymorphic_column(
        &mut self,
        table: &str,
        id_column: &str,
        type_column: &str,
    ) -> Result<(), ConversionError<DB::Error>> {
        let mapping = self.infer_table_mapping(table, type_column).await?;
        self.convert_polymorphic_column_with(table, id_column, type_column, &mapping)
            .await
    }

    /// Applies [`convert_polymorphic_column`](Self::convert_polymorphic_column)
    /// to each declared (id column, type column) pair.
    pub async fn convert_polymorphic_columns(
        &mut self,
        table: &str,
        pairs: &[(&str, &str)],
    ) -> Result<(), ConversionError<DB::Error>> {
        for (id_column, type_column) in pairs {
            self.convert_polymorphic_column(table, id_column, type_column)
                .await?;
        }
        Ok(())
    }

    /// Stages `column`: copies its values into an integer `<column>_orig`
    /// twin, retypes the column to UUID through the deterministic encoder,
    /// and installs `default` (if any) for subsequent inserts.
    ///
    /// Returns the staged twin's name so callers can join against it before
    /// finalization. Each step is a separate statement executed in order with
    /// no partial-success recovery; a failure aborts the run and the host
    /// transaction's rollback cleans up. The `default` expression is caller
    /// code, interpolated as written.
    pub async fn stage_column(
        &mut self,
        table: &str,
        column: &str,
        default: Option<&str>,
    ) -> Result<String, ConversionError<DB::Error>> {
        let table = Ident::new(table)?;
        let column = Ident::new(column)?;
        let legacy = Ident::new(&format!("{column}{LEGACY_SUFFIX}"))?;

        self.exec(&format!("ALTER TABLE {table} ADD COLUMN {legacy} bigint"))
            .await?;
        self.exec(&format!("UPDATE {table} SET {legacy} = {column}"))
            .await?;
        self.exec(&format!(
            "ALTER TABLE {table} ALTER COLUMN {column} DROP DEFAULT"
        ))
        .await?;
        let cast = uuid_cast_sql(column.as_str());
        self.exec(&format!(
            "ALTER TABLE {table} ALTER COLUMN {column} TYPE uuid USING {cast}"
        ))
        .await?;
        if let Some(default) = default {
            self.exec(&format!(
                "ALTER TABLE {table} ALTER COLUMN {column} SET DEFAULT {default}"
            ))
            .await?;
        }
        self.staged.register(table.as_str(), legacy.as_str());
        Ok(legacy.as_str().to_string())
    }

    /// Drops every staged legacy column recorded during this run.
    ///
    /// Must run strictly after all conversions in the migration script, never
    /// interleaved per table: a staged legacy key may still be the join
    /// target of a conversion on an unrelated table. The drops are
    /// `IF EXISTS`, so a column already gone is a no-op, and the ledger is
    /// drained, so calling this twice does nothing the second time.
    pub async fn drop_staged_columns(&mut self) -> Result<(), ConversionError<DB::Error>> {
        let entries = self.staged.drain();
        log::info!("Dropping {} staged legacy column(s)", entries.len());
        for StagedColumn { table, column } in entries {
            let table = Ident::new(&table)?;
            let column = Ident::new(&column)?;
            self.exec(&format!(
                "ALTER TABLE {table} DROP COLUMN IF EXISTS {column}"
            ))
            .await?;
        }
        Ok(())
    }

    /// Points `table.column` at `target`'s new UUID key by joining the
    /// staged legacy values on both sides, integer to integer.
    async fn rewrite_reference(
        &mut self,
        table: &str,
        column: &str,
        legacy: &str,
        target: &str,
        target_key: &str,
        discriminator: Option<(&str, &str)>,
    ) -> Result<u64, ConversionError<DB::Error>> {
        let table = Ident::new(table)?;
        let column = Ident::new(column)?;
        let legacy = Ident::new(legacy)?;
        let target = Ident::new(target)?;
        let target_key = Ident::new(target_key)?;
        let target_legacy = Ident::new(&format!("{target_key}{LEGACY_SUFFIX}"))?;

        let mut sql = format!(
            "UPDATE {table} SET {column} = {target}.{target_key} FROM {target} \
             WHERE {table}.{legacy} = {target}.{target_legacy}"
        );
        if let Some((type_column, value)) = discriminator {
            let type_column = Ident::new(type_column)?;
            sql.push_str(&format!(
                " AND {table}.{type_column} = {}",
                quote_literal(value)
            ));
        }
        self.exec(&sql).await
    }

    async fn require_primary_key(
        &mut self,
        table: &str,
    ) -> Result<String, ConversionError<DB::Error>> {
        self.db
            .primary_key_name(table)
            .await
            .map_err(ConversionError::Database)?
            .ok_or_else(|| ConversionError::MissingPrimaryKey {
                table: table.to_string(),
            })
    }

    /// Drops the auto-increment sequence left behind by a converted key.
    /// Missing sequences are expected; failures are logged and swallowed.
    async fn drop_sequence(&mut self, table: &str, column: &str) {
        let sql = format!("DROP SEQUENCE IF EXISTS {table}_{column}_seq CASCADE");
        log::debug!("Executing: {sql}");
        if let Err(e) = self.db.execute(&sql).await {
            log::warn!("Could not drop sequence for {table}.{column}: {e}");
        }
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, ConversionError<DB::Error>> {
        log::debug!("Executing: {sql}");
        self.db.execute(sql).await.map_err(ConversionError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Records every statement and answers introspection from canned schema.
    #[derive(Default)]
    struct RecordingDatabase {
        statements: Vec<String>,
        // table name -> its single primary-key column, if any
        tables: HashMap<String, Option<String>>,
        distinct: Vec<String>,
    }

    impl RecordingDatabase {
        fn with_table(mut self, table: &str, pk: Option<&str>) -> Self {
            self.tables
                .insert(table.to_string(), pk.map(str::to_string));
            self
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("scripted failure")]
    struct ScriptedError;

    #[async_trait]
    impl Database for RecordingDatabase {
        type Error = ScriptedError;

        async fn execute(&mut self, sql: &str) -> Result<u64, ScriptedError> {
            self.statements.push(sql.to_string());
            Ok(0)
        }

        async fn query_values(&mut self, sql: &str) -> Result<Vec<String>, ScriptedError> {
            self.statements.push(sql.to_string());
            Ok(self.distinct.clone())
        }

        async fn primary_key_name(&mut self, table: &str) -> Result<Option<String>, ScriptedError> {
            Ok(self.tables.get(table).cloned().flatten())
        }

        async fn table_exists(&mut self, table: &str) -> Result<bool, ScriptedError> {
            Ok(self.tables.contains_key(table))
        }
    }

    #[tokio::test]
    async fn staging_emits_the_statement_sequence() {
        let mut db = RecordingDatabase::default().with_table("orders", Some("id"));
        let mut migrator = UuidMigrator::new(&mut db);
        let legacy = migrator
            .stage_column("orders", "id", Some("gen_random_uuid()"))
            .await
            .expect("staging should succeed");
        assert_eq!(legacy, "id_orig");
        assert_eq!(
            migrator.staged_columns(),
            [StagedColumn {
                table: "orders".into(),
                column: "id_orig".into()
            }]
        );
        assert_eq!(
            db.statements,
            [
                "ALTER TABLE orders ADD COLUMN id_orig bigint",
                "UPDATE orders SET id_orig = id",
                "ALTER TABLE orders ALTER COLUMN id DROP DEFAULT",
                "ALTER TABLE orders ALTER COLUMN id TYPE uuid \
                 USING uuid(lpad(replace(id::text, '-', ''), 32, '0'))",
                "ALTER TABLE orders ALTER COLUMN id SET DEFAULT gen_random_uuid()",
            ]
        );
    }

    #[tokio::test]
    async fn primary_key_conversion_introspects_and_drops_the_sequence() {
        let mut db = RecordingDatabase::default().with_table("orders", Some("id"));
        let mut migrator = UuidMigrator::new(&mut db);
        migrator
            .convert_primary_key("orders")
            .await
            .expect("conversion should succeed");
        assert_eq!(
            db.statements.last().map(String::as_str),
            Some("DROP SEQUENCE IF EXISTS orders_id_seq CASCADE")
        );
        assert!(
            db.statements
                .iter()
                .any(|s| s.ends_with("SET DEFAULT gen_random_uuid()"))
        );
    }

    #[tokio::test]
    async fn composite_or_missing_primary_key_is_fatal() {
        let mut db = RecordingDatabase::default().with_table("audit", None);
        let mut migrator = UuidMigrator::new(&mut db);
        let err = migrator
            .convert_primary_key("audit")
            .await
            .expect_err("should refuse a table without a single-column key");
        assert!(matches!(
            err,
            ConversionError::MissingPrimaryKey { ref table } if table == "audit"
        ));
        assert!(db.statements.is_empty(), "nothing should execute");
    }

    #[tokio::test]
    async fn foreign_key_conversion_joins_the_staged_values() {
        let mut db = RecordingDatabase::default()
            .with_table("orders", Some("id"))
            .with_table("line_items", Some("id"));
        let mut migrator = UuidMigrator::new(&mut db);
        migrator
            .convert_foreign_key("line_items", "order_id")
            .await
            .expect("conversion should succeed");
        assert_eq!(
            db.statements.last().map(String::as_str),
            Some(
                "UPDATE line_items SET order_id = orders.id FROM orders \
                 WHERE line_items.order_id_orig = orders.id_orig"
            )
        );
    }

    #[tokio::test]
    async fn foreign_key_without_a_target_table_is_a_no_op() {
        let mut db = RecordingDatabase::default().with_table("line_items", Some("id"));
        let mut migrator = UuidMigrator::new(&mut db);
        migrator
            .convert_foreign_key("line_items", "legacy_batch_id")
            .await
            .expect("a missing target is not an error");
        assert!(migrator.staged_columns().is_empty());
        assert!(db.statements.is_empty());
    }

    #[tokio::test]
    async fn polymorphic_conversion_filters_each_branch_by_discriminator() {
        let mut db = RecordingDatabase::default()
            .with_table("notes", Some("id"))
            .with_table("widgets", Some("id"))
            .with_table("gadgets", Some("id"));
        let mut mapping = BTreeMap::new();
        mapping.insert("Gadget".to_string(), "gadgets".to_string());
        mapping.insert("Widget".to_string(), "widgets".to_string());
        let mut migrator = UuidMigrator::new(&mut db);
        migrator
            .convert_polymorphic_column_with("notes", "subject_id", "subject_type", &mapping)
            .await
            .expect("conversion should succeed");
        let updates: Vec<&str> = db
            .statements
            .iter()
            .filter(|s| s.contains(" FROM "))
            .map(String::as_str)
            .collect();
        assert_eq!(
            updates,
            [
                "UPDATE notes SET subject_id = gadgets.id FROM gadgets \
                 WHERE notes.subject_id_orig = gadgets.id_orig \
                 AND notes.subject_type = 'Gadget'",
                "UPDATE notes SET subject_id = widgets.id FROM widgets \
                 WHERE notes.subject_id_orig = widgets.id_orig \
                 AND notes.subject_type = 'Widget'",
            ]
        );
    }

    #[tokio::test]
    async fn discriminator_literals_are_escaped() {
        let mut db = RecordingDatabase::default()
            .with_table("notes", Some("id"))
            .with_table("widgets", Some("id"));
        let mut mapping = BTreeMap::new();
        mapping.insert("Wid'get".to_string(), "widgets".to_string());
        let mut migrator = UuidMigrator::new(&mut db);
        migrator
            .convert_polymorphic_column_with("notes", "subject_id", "subject_type", &mapping)
            .await
            .expect("conversion should succeed");
        assert!(
            db.statements
                .iter()
                .any(|s| s.ends_with("AND notes.subject_type = 'Wid''get'"))
        );
    }

    #[tokio::test]
    async fn inferred_mappings_skip_tables_that_do_not_exist() {
        let mut db = RecordingDatabase::default()
            .with_table("notes", Some("id"))
            .with_table("widgets", Some("id"));
        db.distinct = vec!["Gadget".to_string(), "Widget".to_string()];
        let mut migrator = UuidMigrator::new(&mut db);
        let mapping = migrator
            .infer_table_mapping("notes", "subject_type")
            .await
            .expect("inference should succeed");
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("Widget").map(String::as_str), Some("widgets"));
    }

    #[tokio::test]
    async fn finalization_drains_the_ledger() {
        let mut db = RecordingDatabase::default()
            .with_table("orders", Some("id"))
            .with_table("line_items", Some("id"));
        let mut migrator = UuidMigrator::new(&mut db);
        migrator.convert_primary_key("orders").await.expect("pk");
        migrator
            .convert_foreign_key("line_items", "order_id")
            .await
            .expect("fk");
        migrator
            .drop_staged_columns()
            .await
            .expect("finalize should succeed");
        assert!(migrator.staged_columns().is_empty());
        let drops: Vec<&str> = db
            .statements
            .iter()
            .filter(|s| s.contains("DROP COLUMN"))
            .map(String::as_str)
            .collect();
        assert_eq!(
            drops,
            [
                "ALTER TABLE orders DROP COLUMN IF EXISTS id_orig",
                "ALTER TABLE line_items DROP COLUMN IF EXISTS order_id_orig",
            ]
        );

        let before = db.statements.len();
        let mut migrator = UuidMigrator::new(&mut db);
        migrator
            .drop_staged_columns()
            .await
            .expect("an empty ledger finalizes cleanly");
        assert_eq!(db.statements.len(), before);
    }

    #[tokio::test]
    async fn hostile_names_are_rejected_before_anything_executes() {
        let mut db = RecordingDatabase::default().with_table("orders", Some("id"));
        let mut migrator = UuidMigrator::new(&mut db);
        let err = migrator
            .stage_column("orders; DROP TABLE users", "id", None)
            .await
            .expect_err("injection-shaped names must not pass");
        assert!(matches!(err, ConversionError::Identifier(_)));
        assert!(db.statements.is_empty());
    }
}
