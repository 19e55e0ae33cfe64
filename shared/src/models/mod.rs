//! Data models
//!
//! Shared between verifactu-server and API clients.
//! DB row types use `#[cfg_attr(feature = "db", derive(sqlx::FromRow))]`.
//! All IDs are `i64` (SQLite INTEGER PRIMARY KEY).

pub mod chain;
pub mod invoice;

// Re-exports
pub use chain::*;
pub use invoice::*;
