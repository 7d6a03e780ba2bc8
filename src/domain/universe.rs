//! Symbol universe: parsing symbol lists and screening them against a
//! market data provider before a run.

use crate::domain::error::TradeError;
use crate::ports::data_port::MarketDataProvider;
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
}

impl From<UniverseError> for TradeError {
    fn from(err: UniverseError) -> Self {
        TradeError::invalid_config("backtest", "symbols", err.to_string())
    }
}

/// Parse a comma-separated list, upper-casing each symbol.
pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let symbol = trimmed.to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniverseValidation {
    pub symbols: Vec<String>,
    pub skipped: Vec<String>,
}

/// Keep the symbols the provider recognises. Fails only when none remain.
pub fn validate_universe(
    market: &dyn MarketDataProvider,
    symbols: Vec<String>,
) -> Result<UniverseValidation, TradeError> {
    let mut valid = Vec::new();
    let mut skipped = Vec::new();

    for symbol in symbols {
        if market.validate_symbol(&symbol) {
            valid.push(symbol);
        } else {
            warn!(symbol = %symbol, stage = "universe", "unknown symbol, skipping");
            skipped.push(symbol);
        }
    }

    if valid.is_empty() {
        return Err(TradeError::data_unavailable(
            "all",
            "no requested symbol is available",
        ));
    }
    if !skipped.is_empty() {
        info!(
            kept = valid.len(),
            requested = valid.len() + skipped.len(),
            stage = "universe",
            "universe reduced"
        );
    }

    Ok(UniverseValidation {
        symbols: valid,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::Bar;

    struct Known(&'static [&'static str]);

    impl MarketDataProvider for Known {
        fn get_price_data(&self, _: &str, _: &str, _: usize) -> Result<Vec<Bar>, TradeError> {
            Ok(vec![])
        }
        fn get_current_price(&self, symbol: &str) -> Result<f64, TradeError> {
            Err(TradeError::data_unavailable(symbol, "none"))
        }
        fn validate_symbol(&self, symbol: &str) -> bool {
            self.0.contains(&symbol)
        }
    }

    #[test]
    fn parse_symbols_basic() {
        assert_eq!(parse_symbols("AAPL,MSFT,TSLA").unwrap(), vec!["AAPL", "MSFT", "TSLA"]);
    }

    #[test]
    fn parse_symbols_trims_and_uppercases() {
        assert_eq!(
            parse_symbols("  aapl , btc/usd ").unwrap(),
            vec!["AAPL", "BTC/USD"]
        );
    }

    #[test]
    fn parse_symbols_empty_token() {
        assert_eq!(parse_symbols("AAPL,,MSFT"), Err(UniverseError::EmptyToken));
    }

    #[test]
    fn parse_symbols_duplicate() {
        assert_eq!(
            parse_symbols("AAPL,msft,aapl"),
            Err(UniverseError::DuplicateSymbol("AAPL".into()))
        );
    }

    #[test]
    fn validate_universe_skips_unknown() {
        let market = Known(&["AAPL", "MSFT"]);
        let v = validate_universe(&market, vec!["AAPL".into(), "ZZZ".into()]).unwrap();
        assert_eq!(v.symbols, vec!["AAPL"]);
        assert_eq!(v.skipped, vec!["ZZZ"]);
    }

    #[test]
    fn validate_universe_fails_when_empty() {
        let market = Known(&[]);
        let err = validate_universe(&market, vec!["AAPL".into()]).unwrap_err();
        assert!(matches!(err, TradeError::DataUnavailable { .. }));
    }
}
