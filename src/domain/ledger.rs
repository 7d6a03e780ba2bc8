//! Position ledger: the only mutator of a [`Portfolio`].
//!
//! `open` and `close` either apply fully or return an error having changed
//! nothing. After every successful call
//! `cash + Σ quantity × price == mark_to_market(prices)` holds by
//! construction, and a symbol has at most one open position.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::debug;

use super::error::TradeError;
use super::portfolio::{EquityPoint, Portfolio};
use super::position::{ExitReason, Position, Trade};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds for {symbol}: need {required:.2}, have {available:.2}")]
    InsufficientFunds {
        symbol: String,
        required: f64,
        available: f64,
    },

    #[error("no open position for {symbol}")]
    InsufficientPosition { symbol: String },

    #[error("position already open for {symbol}")]
    PositionExists { symbol: String },

    #[error("invalid order for {symbol}: {reason}")]
    InvalidOrder { symbol: String, reason: String },
}

impl From<LedgerError> for TradeError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                symbol,
                required,
                available,
            } => TradeError::InsufficientFunds {
                symbol,
                required,
                available,
            },
            LedgerError::InsufficientPosition { symbol } => {
                TradeError::InsufficientPosition { symbol }
            }
            LedgerError::PositionExists { symbol } => TradeError::OrderRejected {
                symbol,
                reason: "position already open".to_string(),
            },
            LedgerError::InvalidOrder { symbol, reason } => {
                TradeError::OrderRejected { symbol, reason }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PositionLedger {
    portfolio: Portfolio,
    stop_loss_pct: f64,
    take_profit_pct: f64,
}

impl PositionLedger {
    /// `stop_loss_pct` / `take_profit_pct` are fractions (0.05 = 5%).
    /// Zero disables the corresponding exit.
    pub fn new(initial_capital: f64, stop_loss_pct: f64, take_profit_pct: f64) -> Self {
        PositionLedger {
            portfolio: Portfolio::new(initial_capital),
            stop_loss_pct,
            take_profit_pct,
        }
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn cash(&self) -> f64 {
        self.portfolio.cash
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.portfolio.get_position(symbol)
    }

    pub fn trades(&self) -> &[Trade] {
        &self.portfolio.closed_trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.portfolio.equity_curve
    }

    pub fn open(
        &mut self,
        symbol: &str,
        price: f64,
        quantity: f64,
        timestamp: NaiveDateTime,
    ) -> Result<&Position, LedgerError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(LedgerError::InvalidOrder {
                symbol: symbol.to_string(),
                reason: format!("price must be finite and positive, got {}", price),
            });
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(LedgerError::InvalidOrder {
                symbol: symbol.to_string(),
                reason: format!("quantity must be finite and positive, got {}", quantity),
            });
        }
        if self.portfolio.has_position(symbol) {
            return Err(LedgerError::PositionExists {
                symbol: symbol.to_string(),
            });
        }
        let cost = price * quantity;
        if cost > self.portfolio.cash {
            return Err(LedgerError::InsufficientFunds {
                symbol: symbol.to_string(),
                required: cost,
                available: self.portfolio.cash,
            });
        }

        let stop_loss = if self.stop_loss_pct > 0.0 {
            price * (1.0 - self.stop_loss_pct)
        } else {
            0.0
        };
        let take_profit = if self.take_profit_pct > 0.0 {
            price * (1.0 + self.take_profit_pct)
        } else {
            0.0
        };

        self.portfolio.cash -= cost;
        debug!(symbol, %timestamp, price, quantity, stop_loss, take_profit, "opened position");
        let position = Position {
            symbol: symbol.to_string(),
            quantity,
            entry_price: price,
            stop_loss,
            take_profit,
            opened_at: timestamp,
        };
        Ok(self
            .portfolio
            .positions
            .entry(symbol.to_string())
            .or_insert(position))
    }

    pub fn close(
        &mut self,
        symbol: &str,
        price: f64,
        timestamp: NaiveDateTime,
        reason: ExitReason,
    ) -> Result<&Trade, LedgerError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(LedgerError::InvalidOrder {
                symbol: symbol.to_string(),
                reason: format!("price must be finite and positive, got {}", price),
            });
        }
        let position =
            self.portfolio
                .positions
                .remove(symbol)
                .ok_or_else(|| LedgerError::InsufficientPosition {
                    symbol: symbol.to_string(),
                })?;

        let pnl = (price - position.entry_price) * position.quantity;
        let pnl_pct = pnl / position.cost_basis();
        self.portfolio.cash += price * position.quantity;

        debug!(symbol, %timestamp, price, pnl, %reason, "closed position");
        self.portfolio.closed_trades.push(Trade {
            symbol: position.symbol,
            entry_price: position.entry_price,
            exit_price: price,
            quantity: position.quantity,
            pnl,
            pnl_pct,
            entry_time: position.opened_at,
            exit_time: timestamp,
            exit_reason: reason,
        });
        // just pushed
        Ok(&self.portfolio.closed_trades[self.portfolio.closed_trades.len() - 1])
    }

    /// Equity at the given prices. Does not mutate.
    pub fn mark_to_market(&self, price_map: &HashMap<String, f64>) -> f64 {
        self.portfolio.total_equity(price_map)
    }

    /// Appends an equity sample and returns its value.
    pub fn record_equity(
        &mut self,
        timestamp: NaiveDateTime,
        price_map: &HashMap<String, f64>,
    ) -> f64 {
        let equity = self.mark_to_market(price_map);
        self.portfolio
            .equity_curve
            .push(EquityPoint { timestamp, equity });
        equity
    }
}
