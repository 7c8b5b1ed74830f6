//! Error types for the VPA pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VpaError>;

#[derive(Debug, Error)]
pub enum VpaError {
    /// A configuration value is out of range. Fatal, raised before any bar is touched.
    #[error("invalid configuration: {field} = {value} ({reason})")]
    InvalidConfiguration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("insufficient history: need {needed} bars, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("failed to fetch {symbol}: {message}")]
    DataFetch { symbol: String, message: String },

    #[error("malformed bar at index {index}: {reason}")]
    MalformedBar { index: usize, reason: String },

    #[error("bar series is empty")]
    EmptySeries,

    #[error("bar series not strictly ordered by timestamp at index {index}")]
    UnorderedSeries { index: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl VpaError {
    pub(crate) fn invalid(field: &'static str, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn fetch(symbol: &str, message: impl ToString) -> Self {
        Self::DataFetch {
            symbol: symbol.to_string(),
            message: message.to_string(),
        }
    }
}
