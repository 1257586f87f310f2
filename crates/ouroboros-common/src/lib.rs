//! Common utilities for the ouroboros PostgreSQL connector
//!
//! This crate provides the error type shared by the connector crates.

pub mod error;

pub use error::{ConnectorError, Result};
