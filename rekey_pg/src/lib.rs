//! # Rekey postgres backend
//!
//! PostgreSQL implementations of rekey's database capability over sqlx.
//!
//! The conversion core issues `ALTER TABLE ... TYPE uuid USING ...` and
//! `UPDATE ... FROM` statements and installs `gen_random_uuid()` defaults,
//! all of which Postgres 13+ supports out of the box (earlier versions need
//! the pgcrypto extension for `gen_random_uuid()`).

#![deny(missing_docs)]

mod database;

pub use database::*;
