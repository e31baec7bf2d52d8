//! Data layer for the restock statistics tool.
//!
//! Fetches notification messages from the timeline API, parses them into
//! restock events, keeps the durable event history and computes windowed
//! statistics over it.

pub mod aggregator;
pub mod fetcher;
pub mod links;
pub mod parser;
pub mod store;

pub use restock_core as core;
