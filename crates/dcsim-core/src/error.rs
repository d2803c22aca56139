//! Error types for dcsim

use thiserror::Error;

use crate::types::{EntityKind, Tick};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Descriptor validation failures.
///
/// All of these are detected before the first tick executes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Datacenter '{0}' declares no nodes")]
    EmptyDatacenter(String),

    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: EntityKind, name: String },

    #[error("simulation.duration must be positive, got {0}")]
    NonPositiveDuration(f64),

    #[error("simulation.tick must be positive, got {0}")]
    NonPositiveTick(f64),

    #[error("{entity}: {field} must be a non-negative number, got {value}")]
    NegativeValue {
        entity: String,
        field: &'static str,
        value: f64,
    },

    #[error("{entity}: {field} must be within [0, 100], got {value}")]
    FluctuationOutOfRange {
        entity: String,
        field: &'static str,
        value: f64,
    },

    #[error("strategy_parameters.max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),

    #[error("Target container '{0}' does not exist")]
    UnresolvedTarget(String),

    #[error("Failed to parse descriptor: {0}")]
    Parse(String),
}

/// Core error type for simulation and analysis
#[derive(Error, Debug)]
pub enum SimError {
    /// The descriptor failed validation; no tick was executed
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An internal invariant broke; the run is aborted
    #[error("Invariant violated at tick {tick}: {detail}")]
    InvariantViolation { tick: Tick, detail: String },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Time window must be at least one tick")]
    ZeroWindow,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Create an invariant violation error
    pub fn invariant(tick: Tick, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            tick,
            detail: detail.into(),
        }
    }

    /// Create an unknown entity error
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity(name.into())
    }

    /// Whether this error came from descriptor validation
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
