//! Shared types for the restock statistics tool.
//!
//! Holds the error taxonomy, the event data model, the product registry,
//! command-line settings, and small time, formatting and statistics helpers
//! used by the data and runtime crates.

pub mod error;
pub mod formatting;
pub mod models;
pub mod registry;
pub mod settings;
pub mod stats;
pub mod time_utils;

pub use error::{RestockError, Result};
