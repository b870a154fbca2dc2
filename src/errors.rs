//! Centralized error handling for climnorm
//!
//! Most "this optional feature could not be applied" situations are logged and
//! the data is passed through unchanged. The variants here cover the cases where
//! continuing would produce physically wrong numbers, or where the caller asked
//! for something that can no longer be delivered.

use chrono::NaiveDateTime;

/// Main error type for climnorm operations
#[derive(Debug, thiserror::Error)]
pub enum ClimNormError {
    /// Malformed or contradictory fix-rule configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Array shape or dimension error
    #[error("array error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// NetCDF file operation errors
    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),

    /// Variable not found in dataset
    #[error("variable '{var}' not found in dataset")]
    VariableNotFound { var: String },

    /// A variable the caller explicitly requested cannot be produced
    #[error("requested variable '{var}' is unavailable: {reason}")]
    VariableUnavailable { var: String, reason: String },

    /// A derived formula refers to another variable defined by the same rule set
    #[error("derived variable '{var}' refers to '{operand}', which is itself defined by the fixer")]
    RecursiveDerivation { var: String, operand: String },

    /// Formula could not be parsed or evaluated
    #[error("formula '{formula}': {message}")]
    Formula { formula: String, message: String },

    /// Unit string could not be parsed
    #[error("cannot parse unit '{unit}': {message}")]
    Unit { unit: String, message: String },

    /// Operation needs a time dimension that the data does not have
    #[error("no time dimension found in data")]
    NoTimeDimension,

    /// Frequency or calendar unit string is not understood
    #[error("invalid frequency '{0}'")]
    InvalidFrequency(String),

    /// Resampling produced no output step at all
    #[error("resampling with frequency '{freq}' produced no output step")]
    EmptyResample { freq: String },

    /// An output timestamp could not be represented
    #[error("null timestamp after resampling with frequency '{freq}'")]
    NullTimestamp { freq: String },

    /// A time bound could not be determined for an output bin
    #[error("null time bounds for output step {index}")]
    NullTimeBounds { index: usize },

    /// Chunks were handed to the decumulator out of time order
    #[error("chunk for '{var}' starts at {first}, not after remembered step {remembered}")]
    OutOfOrderChunk {
        var: String,
        first: NaiveDateTime,
        remembered: NaiveDateTime,
    },

    /// The catalog collaborator could not provide a dataset
    #[error("catalog error: {0}")]
    Catalog(String),
}

/// Result type alias for climnorm operations
pub type Result<T> = std::result::Result<T, ClimNormError>;
