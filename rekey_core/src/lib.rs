//! # Rekey core
//!
//! Converts integer-keyed relational tables to UUID keys in place, without
//! losing referential integrity, including for polymorphic associations
//! whose target table is chosen per row by a companion type column.
//!
//! The crate is the conversion core only. It drives a narrow [`Database`]
//! capability supplied by the host migration (one connection or transaction;
//! see the backend crates for implementations) and issues plain DDL and DML,
//! one statement at a time. Sequencing, commit and rollback belong to the
//! host.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rekey_core::UuidMigrator;
//!
//! // `db` is any Database implementation, e.g. a borrowed sqlx transaction.
//! let mut migrator = UuidMigrator::new(&mut db);
//!
//! // Primary keys first: staging leaves an integer `<column>_orig` twin
//! // that dependent tables join against.
//! migrator.convert_primary_key("orders").await?;
//! migrator.convert_primary_key("line_items").await?;
//!
//! // Then every reference to them, direct or polymorphic.
//! migrator.convert_foreign_key("line_items", "order_id").await?;
//! migrator
//!     .convert_polymorphic_columns("notes", &[("subject_id", "subject_type")])
//!     .await?;
//!
//! // Last, once nothing can still join a staged value.
//! migrator.drop_staged_columns().await?;
//! ```

#![deny(missing_docs)]

mod convert;
mod database;
mod encoder;
mod ledger;
mod naming;
mod sql;

pub use convert::{ConversionError, PrimaryKeyOptions, UuidMigrator};
pub use database::Database;
pub use encoder::{encode_legacy_id, uuid_cast_sql};
pub use ledger::{StagedColumn, TransitoryColumns};
pub use naming::{DefaultConvention, NamingConvention};
pub use sql::{Ident, InvalidIdentifier, quote_literal};

pub mod prelude {
    //! The prelude module for the `rekey_core` crate.
    pub use super::{
        ConversionError, Database, DefaultConvention, NamingConvention, PrimaryKeyOptions,
        StagedColumn, UuidMigrator, encode_legacy_id,
    };
}
