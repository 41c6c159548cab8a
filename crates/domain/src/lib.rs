//! Shared domain types for the wabridge workspace: the configuration tree,
//! the common error type, outbound message templates and destination
//! normalization.

pub mod config;
pub mod error;
pub mod phone;
pub mod templates;

pub use error::{Error, Result};
