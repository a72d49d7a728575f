//! Error types for qobserve

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown observer: {name} (registered: {available})")]
    UnknownObserver { name: String, available: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Calibration error: {0}")]
    Calibration(String),

    #[error("SafeTensors error: {0}")]
    SafeTensors(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
