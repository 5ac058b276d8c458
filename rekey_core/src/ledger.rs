//! Bookkeeping for staged legacy columns.

/// A column created to hold a legacy integer value while dependent tables
/// finish converting.
///
/// The staged column holds the pre-conversion value for every pre-existing
/// row and is only ever read again by joins from tables that have not yet
/// completed their own conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedColumn {
    /// Table owning the staged column.
    pub table: String,
    /// Name of the staged column itself (the `<column>_orig` twin).
    pub column: String,
}

/// Ledger of staged columns accumulated over one migration run.
///
/// Owned by the controller driving the run, appended to as columns are
/// staged, and drained exactly once when the staged columns are dropped at
/// finalization. Registering the same (table, column) pair twice keeps a
/// single entry.
#[derive(Debug, Default)]
pub struct TransitoryColumns {
    entries: Vec<StagedColumn>,
}

impl TransitoryColumns {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a staged column, ignoring duplicates.
    pub fn register(&mut self, table: &str, column: &str) {
        let entry = StagedColumn {
            table: table.to_string(),
            column: column.to_string(),
        };
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    /// The staged columns recorded so far, in registration order.
    pub fn entries(&self) -> &[StagedColumn] {
        &self.entries
    }

    /// Removes and returns every entry, leaving the ledger empty.
    pub fn drain(&mut self) -> Vec<StagedColumn> {
        std::mem::take(&mut self.entries)
    }
}
