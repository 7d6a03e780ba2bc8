//! Core domain types and logic.

pub mod ohlcv;
pub mod indicator;
pub mod stats;
pub mod sentiment;
pub mod social;
pub mod signal;
pub mod position;
pub mod portfolio;
pub mod ledger;
pub mod execution;
pub mod metrics;
pub mod backtest;
pub mod cache;
pub mod code_data;
pub mod universe;
pub mod config_validation;
pub mod live;
pub mod error;
