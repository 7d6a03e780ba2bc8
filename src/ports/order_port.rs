//! Order execution port.
//!
//! The backtest routes every fill through this trait so a live broker
//! client and the in-process simulator are interchangeable.

use chrono::NaiveDateTime;

use crate::domain::error::TradeError;
use crate::domain::sentiment::Side;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderRecord {
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub fill_price: f64,
    pub timestamp: NaiveDateTime,
}

pub trait OrderExecutor {
    fn execute_trade(
        &mut self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        timestamp: NaiveDateTime,
    ) -> Result<OrderRecord, TradeError>;
}
