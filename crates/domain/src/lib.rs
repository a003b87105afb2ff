//! Shared types for the channel gateway crates: the error taxonomy,
//! configuration, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;

pub use error::{Error, Result};
