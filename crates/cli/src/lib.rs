//! Library interface for the fleetindex CLI
//!
//! This module exposes internal functions for integration testing while keeping
//! the main binary logic in main.rs.

pub mod discovery;
pub mod report;

// Re-export commonly needed types for tests
pub use anyhow::Result;
pub use fleetindex_core::config::Config;
