//! # Rekey
//!
//! In-place conversion of integer-keyed relational tables to UUID keys,
//! preserving referential integrity across direct and polymorphic foreign
//! keys. This crate re-exports the conversion core and, behind feature
//! flags, the available database backends.

#![deny(missing_docs)]

#[cfg(feature = "in-memory")]
/// In-memory backend for the `rekey` crate.
pub mod mem {
    //! Contains the in-memory database backend, primarily for testing.
    pub use rekey_mem::*;
}

#[cfg(feature = "postgres")]
/// PostgreSQL backend for the `rekey` crate.
pub mod pg {
    //! Contains the sqlx-based PostgreSQL database backend.
    pub use rekey_pg::*;
}

pub mod prelude {
    //! The prelude module for the `rekey` crate.
    pub use rekey_core::prelude::*;

    #[cfg(feature = "in-memory")]
    pub use super::mem::*;
    #[cfg(feature = "postgres")]
    pub use super::pg::*;
}
