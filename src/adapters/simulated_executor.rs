//! In-process order executor: instant full fills at the requested price.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::domain::error::TradeError;
use crate::domain::sentiment::Side;
use crate::ports::order_port::{OrderExecutor, OrderRecord};

#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor {
    next_id: u64,
    fills: Vec<OrderRecord>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fills(&self) -> &[OrderRecord] {
        &self.fills
    }
}

impl OrderExecutor for SimulatedExecutor {
    fn execute_trade(
        &mut self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        timestamp: NaiveDateTime,
    ) -> Result<OrderRecord, TradeError> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(TradeError::OrderRejected {
                symbol: symbol.to_string(),
                reason: format!("quantity must be positive, got {}", quantity),
            });
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(TradeError::OrderRejected {
                symbol: symbol.to_string(),
                reason: format!("price must be positive, got {}", price),
            });
        }
        self.next_id += 1;
        let record = OrderRecord {
            order_id: self.next_id,
            symbol: symbol.to_string(),
            side,
            quantity,
            fill_price: price,
            timestamp,
        };
        debug!(symbol, order_id = record.order_id, %side, quantity, price, "simulated fill");
        self.fills.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn fills_in_full_at_requested_price() {
        let mut exec = SimulatedExecutor::new();
        let rec = exec
            .execute_trade("BTC/USD", Side::Buy, 0.25, 40_000.0, ts())
            .unwrap();
        assert_eq!(rec.order_id, 1);
        assert!((rec.quantity - 0.25).abs() < f64::EPSILON);
        assert!((rec.fill_price - 40_000.0).abs() < f64::EPSILON);

        let rec = exec
            .execute_trade("BTC/USD", Side::Sell, 0.25, 41_000.0, ts())
            .unwrap();
        assert_eq!(rec.order_id, 2);
        assert_eq!(exec.fills().len(), 2);
    }

    #[test]
    fn rejects_zero_quantity() {
        let mut exec = SimulatedExecutor::new();
        let err = exec
            .execute_trade("ETH/USD", Side::Buy, 0.0, 2_000.0, ts())
            .unwrap_err();
        assert!(matches!(err, TradeError::OrderRejected { .. }));
        assert!(exec.fills().is_empty());
    }
}
