//! Wire types for the REST API

pub mod models;

pub use models::*;
