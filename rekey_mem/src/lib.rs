//! # Rekey memory backend
//!
//! In-memory implementation of rekey's database capability, primarily for
//! testing. It is a deliberately small engine: typed rows, insert-time
//! defaults, sequences, and exactly the statement family the conversion core
//! emits. It is not recommended for anything beyond tests and examples.

#![deny(missing_docs)]

mod database;

pub use database::*;
