//! Shared types for the glance analyzer gateway
//!
//! Everything the gateway and its tests need to agree on lives here:
//! the analyzer wire contract, the roster configuration, emoji constants
//! and the common error type.

pub mod config;
pub mod emoji;
pub mod error;
pub mod types;

pub use error::{Error, Result};
