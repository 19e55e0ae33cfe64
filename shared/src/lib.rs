//! Shared types for the Verifactu integrity service
//!
//! Error system, invoice/chain models and small utilities used by
//! verifactu-server and its API clients.

pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use axum::Json;
pub use http;
pub use serde::{Deserialize, Serialize};
