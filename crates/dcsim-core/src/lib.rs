//! dcsim Core - Shared types and traits
//!
//! This crate defines the vocabulary used across the simulation engine,
//! the analyzer and the `dcsim` binary:
//! - Resource vectors and entity identifiers
//! - Lifecycle states and overload policies
//! - Placement strategy names and decisions
//! - The `FluctuationSource` trait (injected randomness)
//! - Error types

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
