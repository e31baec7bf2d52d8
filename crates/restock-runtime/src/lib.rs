//! Runtime layer for the restock statistics tool.
//!
//! Renders aggregates into a report grid, publishes it to a spreadsheet,
//! CSV file or stdout, and drives a single fetch-to-publish run.

pub mod credentials;
pub mod pipeline;
pub mod publisher;
pub mod report;

pub use restock_core as core;
pub use restock_data as data;
