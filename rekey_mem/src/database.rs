use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use rekey_core::{Database, uuid_cast_sql};
use uuid::Uuid;

/// Column types the engine models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// 64-bit integer.
    BigInt,
    /// UUID.
    Uuid,
    /// Text.
    Text,
}

/// A cell value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Integer value.
    Int(i64),
    /// UUID value.
    Uuid(Uuid),
    /// Text value.
    Text(String),
}

impl Value {
    /// Convenience constructor for text values.
    pub fn text(value: &str) -> Self {
        Value::Text(value.to_string())
    }

    /// The value rendered as SQL text; `None` for NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(i) => Some(i.to_string()),
            Value::Uuid(u) => Some(u.to_string()),
            Value::Text(t) => Some(t.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    ty: SqlType,
    default: Option<String>,
}

/// A row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct Table {
    columns: Vec<Column>,
    primary_key: Vec<String>,
    rows: Vec<Row>,
}

/// Declarative table definition for seeding the engine.
#[derive(Debug)]
pub struct TableSpec {
    name: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
    sequences: Vec<String>,
}

impl TableSpec {
    /// Starts a table definition.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            sequences: Vec::new(),
        }
    }

    /// Adds an auto-increment bigint primary key backed by a
    /// `<table>_<column>_seq` sequence.
    pub fn serial_primary_key(mut self, column: &str) -> Self {
        let sequence = format!("{}_{}_seq", self.name, column);
        self.columns.push(Column {
            name: column.to_string(),
            ty: SqlType::BigInt,
            default: Some(format!("nextval('{sequence}')")),
        });
        self.primary_key = vec![column.to_string()];
        self.sequences.push(sequence);
        self
    }

    /// Declares a composite primary key over already-added columns.
    pub fn composite_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Adds a bigint column with no default.
    pub fn big_int(mut self, column: &str) -> Self {
        self.columns.push(Column {
            name: column.to_string(),
            ty: SqlType::BigInt,
            default: None,
        });
        self
    }

    /// Adds a text column with no default.
    pub fn text(mut self, column: &str) -> Self {
        self.columns.push(Column {
            name: column.to_string(),
            ty: SqlType::Text,
            default: None,
        });
        self
    }
}

/// Errors surfaced by the in-memory engine.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryDatabaseError {
    /// Statement referenced a table the engine does not know.
    #[error("no such table: {0}")]
    NoSuchTable(String),
    /// Statement referenced a column the table does not have.
    #[error("no such column: {0}.{1}")]
    NoSuchColumn(String, String),
    /// A column with this name already exists.
    #[error("column already exists: {0}.{1}")]
    DuplicateColumn(String, String),
    /// A value could not be coerced to UUID.
    #[error("cannot coerce {0:?} to uuid")]
    Coercion(String),
    /// The engine does not understand the statement.
    #[error("unsupported statement: {0}")]
    Unsupported(String),
}

/// An in-memory database.
///
/// This backend is useful for testing and development purposes: it models
/// just enough of a relational engine to run conversions end to end. Typed
/// columns, defaults applied on insert (`gen_random_uuid()` generates a
/// fresh v4, `nextval` bumps a sequence counter), and the statement family
/// the conversion core emits. Every executed statement is recorded and can
/// be inspected with [`executed`](Self::executed).
///
/// The UUID coercion is implemented here independently of the core's
/// encoder, so tests comparing the two genuinely cross-check the pure
/// function against the SQL-side expression.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    tables: BTreeMap<String, Table>,
    sequences: BTreeMap<String, i64>,
    executed: Vec<String>,
}

impl InMemoryDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        log::debug!("Creating a new InMemoryDatabase");
        Self::default()
    }

    /// Creates a table from its definition, registering any sequences.
    pub fn add_table(&mut self, spec: TableSpec) {
        for sequence in &spec.sequences {
            self.sequences.insert(sequence.clone(), 0);
        }
        self.tables.insert(
            spec.name,
            Table {
                columns: spec.columns,
                primary_key: spec.primary_key,
                rows: Vec::new(),
            },
        );
    }

    /// Inserts a row; columns not listed get their default, or NULL.
    pub fn insert(
        &mut self,
        table: &str,
        values: &[(&str, Value)],
    ) -> Result<(), InMemoryDatabaseError> {
        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| InMemoryDatabaseError::NoSuchTable(table.to_string()))?;
        for (name, _) in values {
            if !t.columns.iter().any(|c| c.name == *name) {
                return Err(InMemoryDatabaseError::NoSuchColumn(
                    table.to_string(),
                    (*name).to_string(),
                ));
            }
        }
        let mut row = Row::new();
        for column in &t.columns {
            let provided = values
                .iter()
                .find(|(name, _)| *name == column.name)
                .map(|(_, value)| value.clone());
            let value = match provided {
                Some(value) => value,
                None => match column.default.as_deref() {
                    Some("gen_random_uuid()") => Value::Uuid(Uuid::new_v4()),
                    Some(expr) => match sequence_name(expr) {
                        Some(sequence) => {
                            let counter =
                                self.sequences.entry(sequence.to_string()).or_insert(0);
                            *counter += 1;
                            Value::Int(*counter)
                        }
                        None => Value::Null,
                    },
                    None => Value::Null,
                },
            };
            row.insert(column.name.clone(), value);
        }
        t.rows.push(row);
        Ok(())
    }

    /// The rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Option<&[Row]> {
        self.tables.get(table).map(|t| t.rows.as_slice())
    }

    /// Overwrites one cell. Meant for tests that simulate out-of-band
    /// changes, e.g. an application re-keying a row after staging.
    pub fn set_value(
        &mut self,
        table: &str,
        row: usize,
        column: &str,
        value: Value,
    ) -> Result<(), InMemoryDatabaseError> {
        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| InMemoryDatabaseError::NoSuchTable(table.to_string()))?;
        if !t.columns.iter().any(|c| c.name == column) {
            return Err(InMemoryDatabaseError::NoSuchColumn(
                table.to_string(),
                column.to_string(),
            ));
        }
        if let Some(row) = t.rows.get_mut(row) {
            row.insert(column.to_string(), value);
        }
        Ok(())
    }

    /// Whether the table has a column with this name.
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|t| t.columns.iter().any(|c| c.name == column))
    }

    /// The declared type of a column.
    pub fn column_type(&self, table: &str, column: &str) -> Option<SqlType> {
        self.tables
            .get(table)?
            .columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.ty)
    }

    /// The default expression of a column, if any.
    pub fn column_default(&self, table: &str, column: &str) -> Option<&str> {
        self.tables
            .get(table)?
            .columns
            .iter()
            .find(|c| c.name == column)?
            .default
            .as_deref()
    }

    /// Whether a sequence with this name exists.
    pub fn has_sequence(&self, name: &str) -> bool {
        self.sequences.contains_key(name)
    }

    /// Every statement executed so far, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    fn apply(&mut self, sql: &str) -> Result<u64, InMemoryDatabaseError> {
        let stmt = sql.trim().trim_end_matches(';').trim();
        if let Some(rest) = stmt.strip_prefix("ALTER TABLE ") {
            self.alter_table(rest, stmt)
        } else if let Some(rest) = stmt.strip_prefix("UPDATE ") {
            self.update(rest, stmt)
        } else if let Some(rest) = stmt.strip_prefix("DROP SEQUENCE IF EXISTS ") {
            let name = rest.strip_suffix(" CASCADE").unwrap_or(rest).trim();
            self.sequences.remove(name);
            Ok(0)
        } else {
            Err(unsupported(stmt))
        }
    }

    fn alter_table(&mut self, rest: &str, stmt: &str) -> Result<u64, InMemoryDatabaseError> {
        let (table, action) = rest.split_once(' ').ok_or_else(|| unsupported(stmt))?;
        if let Some(spec) = action.strip_prefix("ADD COLUMN ") {
            let (column, ty) = spec.split_once(' ').ok_or_else(|| unsupported(stmt))?;
            let ty = match ty {
                "bigint" => SqlType::BigInt,
                "uuid" => SqlType::Uuid,
                "text" => SqlType::Text,
                _ => return Err(unsupported(stmt)),
            };
            let t = self.table_mut(table)?;
            if t.columns.iter().any(|c| c.name == column) {
                return Err(InMemoryDatabaseError::DuplicateColumn(
                    table.to_string(),
                    column.to_string(),
                ));
            }
            t.columns.push(Column {
                name: column.to_string(),
                ty,
                default: None,
            });
            for row in &mut t.rows {
                row.insert(column.to_string(), Value::Null);
            }
            Ok(0)
        } else if let Some(spec) = action.strip_prefix("ALTER COLUMN ") {
            let (column, change) = spec.split_once(' ').ok_or_else(|| unsupported(stmt))?;
            if change == "DROP DEFAULT" {
                let idx = self.column_index(table, column)?;
                let t = self.table_mut(table)?;
                t.columns[idx].default = None;
                Ok(0)
            } else if let Some(expr) = change.strip_prefix("SET DEFAULT ") {
                let idx = self.column_index(table, column)?;
                let expr = expr.to_string();
                let t = self.table_mut(table)?;
                t.columns[idx].default = Some(expr);
                Ok(0)
            } else if let Some(expr) = change.strip_prefix("TYPE uuid USING ") {
                // Only the canonical coercion expression is understood.
                if expr != uuid_cast_sql(column) {
                    return Err(unsupported(stmt));
                }
                let idx = self.column_index(table, column)?;
                let t = self.table_mut(table)?;
                for row in &mut t.rows {
                    let value = row.get(column).cloned().unwrap_or(Value::Null);
                    let coerced = coerce_to_uuid(&value)?;
                    row.insert(column.to_string(), coerced);
                }
                t.columns[idx].ty = SqlType::Uuid;
                Ok(0)
            } else {
                Err(unsupported(stmt))
            }
        } else if let Some(column) = action.strip_prefix("DROP COLUMN IF EXISTS ") {
            let t = self.table_mut(table)?;
            let existed = t.columns.iter().any(|c| c.name == column);
            if existed {
                t.columns.retain(|c| c.name != column);
                for row in &mut t.rows {
                    row.remove(column);
                }
            }
            Ok(0)
        } else {
            Err(unsupported(stmt))
        }
    }

    fn update(&mut self, rest: &str, stmt: &str) -> Result<u64, InMemoryDatabaseError> {
        let (table, tail) = rest.split_once(" SET ").ok_or_else(|| unsupported(stmt))?;
        match tail.split_once(" FROM ") {
            Some((assignment, join)) => self.update_from(table, assignment, join, stmt),
            None => {
                // Plain column-to-column copy: "SET <dst> = <src>".
                let (dst, src) = tail.split_once(" = ").ok_or_else(|| unsupported(stmt))?;
                if !is_bare_name(src) {
                    return Err(unsupported(stmt));
                }
                self.column_index(table, dst)?;
                self.column_index(table, src)?;
                let t = self.table_mut(table)?;
                for row in &mut t.rows {
                    let value = row.get(src).cloned().unwrap_or(Value::Null);
                    row.insert(dst.to_string(), value);
                }
                Ok(t.rows.len() as u64)
            }
        }
    }

    fn update_from(
        &mut self,
        table: &str,
        assignment: &str,
        join: &str,
        stmt: &str,
    ) -> Result<u64, InMemoryDatabaseError> {
        let (column, source) = assignment.split_once(" = ").ok_or_else(|| unsupported(stmt))?;
        let (target, target_key) = source.split_once('.').ok_or_else(|| unsupported(stmt))?;
        let (join_target, where_clause) =
            join.split_once(" WHERE ").ok_or_else(|| unsupported(stmt))?;
        if join_target != target {
            return Err(unsupported(stmt));
        }
        let (condition, filter) = match where_clause.split_once(" AND ") {
            Some((condition, filter)) => (condition, Some(filter)),
            None => (where_clause, None),
        };
        let (lhs, rhs) = condition.split_once(" = ").ok_or_else(|| unsupported(stmt))?;
        let (join_table, legacy) = lhs.split_once('.').ok_or_else(|| unsupported(stmt))?;
        let (rhs_target, target_legacy) = rhs.split_once('.').ok_or_else(|| unsupported(stmt))?;
        if join_table != table || rhs_target != target {
            return Err(unsupported(stmt));
        }
        let filter = match filter {
            Some(filter) => {
                let (lhs, literal) = filter.split_once(" = ").ok_or_else(|| unsupported(stmt))?;
                let (filter_table, filter_column) =
                    lhs.split_once('.').ok_or_else(|| unsupported(stmt))?;
                if filter_table != table {
                    return Err(unsupported(stmt));
                }
                let literal = literal
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .ok_or_else(|| unsupported(stmt))?
                    .replace("''", "'");
                self.column_index(table, filter_column)?;
                Some((filter_column.to_string(), literal))
            }
            None => None,
        };

        self.column_index(target, target_key)?;
        self.column_index(target, target_legacy)?;
        self.column_index(table, column)?;
        self.column_index(table, legacy)?;

        // Snapshot the join side so a table may reference itself.
        let target_rows = match self.tables.get(target) {
            Some(t) => t
                .rows
                .iter()
                .map(|row| {
                    (
                        row.get(target_legacy).cloned().unwrap_or(Value::Null),
                        row.get(target_key).cloned().unwrap_or(Value::Null),
                    )
                })
                .collect::<Vec<_>>(),
            None => return Err(InMemoryDatabaseError::NoSuchTable(target.to_string())),
        };

        let t = self.table_mut(table)?;
        let mut affected = 0;
        for row in &mut t.rows {
            if let Some((filter_column, literal)) = &filter {
                match row.get(filter_column.as_str()) {
                    Some(Value::Text(value)) if value == literal => {}
                    _ => continue,
                }
            }
            let key = match row.get(legacy) {
                Some(Value::Null) | None => continue,
                Some(value) => value.clone(),
            };
            if let Some((_, new)) = target_rows.iter().find(|(l, _)| *l != Value::Null && *l == key)
            {
                row.insert(column.to_string(), new.clone());
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn run_query(&self, sql: &str) -> Result<Vec<String>, InMemoryDatabaseError> {
        let stmt = sql.trim().trim_end_matches(';').trim();
        let rest = stmt
            .strip_prefix("SELECT DISTINCT ")
            .ok_or_else(|| unsupported(stmt))?;
        let (column, rest) = rest.split_once(" FROM ").ok_or_else(|| unsupported(stmt))?;
        let (table, tail) = rest.split_once(" WHERE ").ok_or_else(|| unsupported(stmt))?;
        if tail != format!("{column} IS NOT NULL ORDER BY {column}") {
            return Err(unsupported(stmt));
        }
        let t = self
            .tables
            .get(table)
            .ok_or_else(|| InMemoryDatabaseError::NoSuchTable(table.to_string()))?;
        if !t.columns.iter().any(|c| c.name == column) {
            return Err(InMemoryDatabaseError::NoSuchColumn(
                table.to_string(),
                column.to_string(),
            ));
        }
        let mut values = BTreeSet::new();
        for row in &t.rows {
            if let Some(text) = row.get(column).and_then(Value::as_text) {
                values.insert(text);
            }
        }
        Ok(values.into_iter().collect())
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Table, InMemoryDatabaseError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| InMemoryDatabaseError::NoSuchTable(table.to_string()))
    }

    fn column_index(&self, table: &str, column: &str) -> Result<usize, InMemoryDatabaseError> {
        let t = self
            .tables
            .get(table)
            .ok_or_else(|| InMemoryDatabaseError::NoSuchTable(table.to_string()))?;
        t.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| {
                InMemoryDatabaseError::NoSuchColumn(table.to_string(), column.to_string())
            })
    }
}

fn unsupported(stmt: &str) -> InMemoryDatabaseError {
    InMemoryDatabaseError::Unsupported(stmt.to_string())
}

fn is_bare_name(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn sequence_name(expr: &str) -> Option<&str> {
    expr.strip_prefix("nextval('")?.strip_suffix("')")
}

/// The engine's own rendition of the SQL coercion: value as text, hyphens
/// stripped, left-padded (and, like `lpad`, truncated) to 32 hex characters,
/// parsed as a UUID. NULL stays NULL; anything non-hex is a coercion error,
/// the way the real engine would reject malformed legacy data.
fn coerce_to_uuid(value: &Value) -> Result<Value, InMemoryDatabaseError> {
    let text = match value.as_text() {
        Some(text) => text,
        None => return Ok(Value::Null),
    };
    let stripped: String = text.chars().filter(|c| *c != '-').take(32).collect();
    let padded = format!("{stripped:0>32}");
    let mut bits: u128 = 0;
    for c in padded.chars() {
        let nibble = c
            .to_digit(16)
            .ok_or_else(|| InMemoryDatabaseError::Coercion(text.clone()))?;
        bits = (bits << 4) | u128::from(nibble);
    }
    Ok(Value::Uuid(Uuid::from_u128(bits)))
}

#[async_trait]
impl Database for InMemoryDatabase {
    type Error = InMemoryDatabaseError;

    async fn execute(&mut self, sql: &str) -> Result<u64, InMemoryDatabaseError> {
        log::debug!("execute: {sql}");
        self.executed.push(sql.to_string());
        self.apply(sql)
    }

    async fn query_values(&mut self, sql: &str) -> Result<Vec<String>, InMemoryDatabaseError> {
        log::debug!("query: {sql}");
        self.executed.push(sql.to_string());
        self.run_query(sql)
    }

    async fn primary_key_name(&mut self, table: &str) -> Result<Option<String>, InMemoryDatabaseError> {
        let t = self
            .tables
            .get(table)
            .ok_or_else(|| InMemoryDatabaseError::NoSuchTable(table.to_string()))?;
        match t.primary_key.as_slice() {
            [column] => Ok(Some(column.clone())),
            _ => Ok(None),
        }
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool, InMemoryDatabaseError> {
        Ok(self.tables.contains_key(table))
    }
}
