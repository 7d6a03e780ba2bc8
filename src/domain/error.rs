//! Domain error types.

use chrono::NaiveDateTime;

/// Top-level error type for sentitrade.
#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid configuration [{section}] {key}: {reason}")]
    InvalidConfiguration {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("insufficient funds for {symbol}: need {required:.2}, have {available:.2}")]
    InsufficientFunds {
        symbol: String,
        required: f64,
        available: f64,
    },

    #[error("no open position for {symbol}")]
    InsufficientPosition { symbol: String },

    #[error("computation error for {symbol} at {timestamp}: {reason}")]
    ComputationError {
        symbol: String,
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("order rejected for {symbol}: {reason}")]
    OrderRejected { symbol: String, reason: String },

    #[error("{operation} timed out after {millis} ms")]
    Timeout { operation: String, millis: u64 },

    #[error("worker {name} panicked")]
    WorkerPanicked { name: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradeError {
    pub fn invalid_config(section: &str, key: &str, reason: impl Into<String>) -> Self {
        TradeError::InvalidConfiguration {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn data_unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        TradeError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&TradeError> for std::process::ExitCode {
    fn from(err: &TradeError) -> Self {
        let code: u8 = match err {
            TradeError::Io(_) | TradeError::Csv(_) | TradeError::WorkerPanicked { .. } => 1,
            TradeError::ConfigParse { .. }
            | TradeError::ConfigMissing { .. }
            | TradeError::InvalidConfiguration { .. } => 2,
            TradeError::DataUnavailable { .. } | TradeError::Timeout { .. } => 3,
            TradeError::InsufficientFunds { .. }
            | TradeError::InsufficientPosition { .. }
            | TradeError::OrderRejected { .. } => 4,
            TradeError::ComputationError { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
