//! Shared types for shiori.
//!
//! This crate holds the typed identifiers, metadata value types, and the
//! error taxonomy used across the provider, media-server, and orchestration
//! layers. It is deliberately free of I/O and async concerns.

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
