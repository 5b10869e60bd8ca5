//! Lore Core - Core types and domain models for the Lore knowledge base engine.

mod access;
mod error;
mod types;

pub use access::*;
pub use error::{Error, Result};
pub use types::*;
