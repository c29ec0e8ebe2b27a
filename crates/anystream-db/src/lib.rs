//! anystream-db: the catalog store.
//!
//! SQLite-backed persistence with connection pooling, embedded migrations,
//! typed row models, and one query module per table. Every driver failure
//! surfaces as [`anystream_core::Error::Database`].

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
