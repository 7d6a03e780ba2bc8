//! Position sizing, exit triggers and fill routing.
//!
//! Orders are planned against the [`PositionLedger`] as an [`OrderIntent`],
//! sent through an [`OrderExecutor`], and the reported fill is booked.
//! Simulated fills are instantaneous and complete at the bar close.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use tracing::{error, info, warn};

use super::error::TradeError;
use super::ledger::PositionLedger;
use super::ohlcv::Bar;
use super::position::{ExitReason, Position, Trade};
use super::sentiment::Side;
use super::signal::{Action, Signal};
use crate::ports::order_port::{OrderExecutor, OrderRecord};

/// Execution parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Fraction of available capital committed per entry.
    pub max_position_fraction: f64,
    /// Fractions of entry price; 0 disables.
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub min_order_sizes: HashMap<String, f64>,
    /// Quantity decimals by symbol prefix, first match wins.
    pub precision_rules: Vec<(String, u32)>,
    pub default_precision: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::equity()
    }
}

impl ExecutionConfig {
    pub fn equity() -> Self {
        ExecutionConfig {
            max_position_fraction: 0.1,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
            min_order_sizes: HashMap::new(),
            precision_rules: Vec::new(),
            default_precision: 2,
        }
    }

    pub fn crypto() -> Self {
        let min_order_sizes = [
            ("BTC/USD", 0.0001),
            ("ETH/USD", 0.001),
            ("SOL/USD", 0.1),
            ("AVAX/USD", 0.1),
            ("LINK/USD", 1.0),
            ("DOT/USD", 1.0),
            ("UNI/USD", 1.0),
            ("AAVE/USD", 0.01),
        ]
        .into_iter()
        .map(|(s, m)| (s.to_string(), m))
        .collect();
        ExecutionConfig {
            max_position_fraction: 0.1,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            min_order_sizes,
            precision_rules: vec![("BTC".to_string(), 8), ("ETH".to_string(), 6)],
            default_precision: 4,
        }
    }

    pub fn validate(&self) -> Result<(), TradeError> {
        let f = self.max_position_fraction;
        if !f.is_finite() || f <= 0.0 || f > 1.0 {
            return Err(TradeError::invalid_config(
                "execution",
                "max_position_fraction",
                format!("must be in (0, 1], got {}", f),
            ));
        }
        for (key, pct) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if !pct.is_finite() || !(0.0..1.0).contains(&pct) {
                return Err(TradeError::invalid_config(
                    "execution",
                    key,
                    format!("must be in [0, 1), got {}", pct),
                ));
            }
        }
        for (symbol, min) in &self.min_order_sizes {
            if !min.is_finite() || *min < 0.0 {
                return Err(TradeError::invalid_config(
                    "execution",
                    "min_order_size",
                    format!("{} has invalid minimum {}", symbol, min),
                ));
            }
        }
        if self.default_precision > 12 {
            return Err(TradeError::invalid_config(
                "execution",
                "default_precision",
                "at most 12 decimals",
            ));
        }
        Ok(())
    }

    pub fn min_order_size(&self, symbol: &str) -> f64 {
        self.min_order_sizes.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn precision(&self, symbol: &str) -> u32 {
        self.precision_rules
            .iter()
            .find(|(prefix, _)| symbol.starts_with(prefix.as_str()))
            .map(|(_, p)| *p)
            .unwrap_or(self.default_precision)
    }
}

/// Floor `quantity` to `decimals` places. A tiny tolerance keeps exact
/// values like 10.0 from flooring to 9.99 through representation error.
pub fn round_down(quantity: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (quantity * scale + 1e-9).floor() / scale
}

/// Units to buy with `capital` at `price`, or `None` when the order would
/// fall below the symbol's minimum size or round to zero.
pub fn size_position(config: &ExecutionConfig, symbol: &str, capital: f64, price: f64) -> Option<f64> {
    if !(price.is_finite() && price > 0.0 && capital.is_finite() && capital > 0.0) {
        return None;
    }
    let raw = capital * config.max_position_fraction / price;
    let min = config.min_order_size(symbol);
    if raw < min {
        return None;
    }
    let quantity = round_down(raw, config.precision(symbol));
    if quantity <= 0.0 || quantity < min {
        None
    } else {
        Some(quantity)
    }
}

/// Exit due at `close`, if any. Stop-loss is checked first, so a bar that
/// satisfies both exits as a stop.
pub fn exit_trigger(position: &Position, close: f64) -> Option<ExitReason> {
    if position.should_stop_loss(close) {
        Some(ExitReason::StopLoss)
    } else if position.should_take_profit(close) {
        Some(ExitReason::TakeProfit)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fill {
    Opened { quantity: f64, price: f64 },
    Closed(Trade),
}

/// What a submitted order is for, which decides how its fill is booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPurpose {
    Entry,
    Exit(ExitReason),
    /// Offsets a fill the ledger refused; booked nowhere.
    Unwind,
}

/// An order planned against the ledger but not yet sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: NaiveDateTime,
    pub purpose: OrderPurpose,
}

impl OrderIntent {
    /// Opposite order for exactly what `record` filled.
    pub fn unwind(&self, record: &OrderRecord) -> OrderIntent {
        OrderIntent {
            symbol: self.symbol.clone(),
            side: match record.side {
                Side::Buy => Side::Sell,
                Side::Sell => Side::Buy,
            },
            quantity: record.quantity,
            price: record.fill_price,
            timestamp: self.timestamp,
            purpose: OrderPurpose::Unwind,
        }
    }

    pub fn send<E: OrderExecutor + ?Sized>(&self, executor: &mut E) -> Result<OrderRecord, TradeError> {
        executor.execute_trade(&self.symbol, self.side, self.quantity, self.price, self.timestamp)
    }
}

/// Sell of the whole open position at the bar close.
pub fn plan_exit(
    ledger: &PositionLedger,
    symbol: &str,
    bar: &Bar,
    reason: ExitReason,
) -> Result<OrderIntent, TradeError> {
    let quantity = ledger
        .position(symbol)
        .map(|p| p.quantity)
        .ok_or_else(|| TradeError::InsufficientPosition {
            symbol: symbol.to_string(),
        })?;
    Ok(OrderIntent {
        symbol: symbol.to_string(),
        side: Side::Sell,
        quantity,
        price: bar.close,
        timestamp: bar.timestamp,
        purpose: OrderPurpose::Exit(reason),
    })
}

/// Exit order due on this bar, if the stop or target was hit.
pub fn plan_triggered_exit(ledger: &PositionLedger, symbol: &str, bar: &Bar) -> Option<OrderIntent> {
    let reason = ledger.position(symbol).and_then(|p| exit_trigger(p, bar.close))?;
    plan_exit(ledger, symbol, bar, reason).ok()
}

/// Order a signal calls for: BUY opens when flat, SELL closes when long.
/// Everything else plans nothing.
pub fn plan_signal(
    ledger: &PositionLedger,
    config: &ExecutionConfig,
    signal: &Signal,
    bar: &Bar,
) -> Result<Option<OrderIntent>, TradeError> {
    let symbol = signal.symbol.as_str();
    match (signal.action, ledger.position(symbol).is_some()) {
        (Action::Buy, false) => {
            let Some(quantity) = size_position(config, symbol, ledger.cash(), bar.close) else {
                warn!(
                    symbol,
                    timestamp = %bar.timestamp,
                    cash = ledger.cash(),
                    price = bar.close,
                    stage = "execute",
                    "order below minimum size, skipped"
                );
                return Ok(None);
            };
            let cost = quantity * bar.close;
            if cost > ledger.cash() {
                return Err(TradeError::InsufficientFunds {
                    symbol: symbol.to_string(),
                    required: cost,
                    available: ledger.cash(),
                });
            }
            Ok(Some(OrderIntent {
                symbol: symbol.to_string(),
                side: Side::Buy,
                quantity,
                price: bar.close,
                timestamp: bar.timestamp,
                purpose: OrderPurpose::Entry,
            }))
        }
        (Action::Sell, true) => plan_exit(ledger, symbol, bar, ExitReason::Signal).map(Some),
        _ => Ok(None),
    }
}

/// Book what the executor reported. Entries are booked at the reported
/// price and quantity, so a fill above the requested price can exceed cash
/// and be refused here.
pub fn book_fill(
    ledger: &mut PositionLedger,
    intent: &OrderIntent,
    record: &OrderRecord,
) -> Result<Option<Fill>, TradeError> {
    let symbol = intent.symbol.as_str();
    match intent.purpose {
        OrderPurpose::Entry => {
            let position = ledger.open(symbol, record.fill_price, record.quantity, intent.timestamp)?;
            info!(
                symbol,
                timestamp = %intent.timestamp,
                quantity = position.quantity,
                price = position.entry_price,
                stop_loss = position.stop_loss,
                take_profit = position.take_profit,
                stage = "execute",
                "position opened"
            );
            Ok(Some(Fill::Opened {
                quantity: position.quantity,
                price: position.entry_price,
            }))
        }
        OrderPurpose::Exit(reason) => {
            let trade = ledger
                .close(symbol, record.fill_price, intent.timestamp, reason)?
                .clone();
            info!(
                symbol,
                timestamp = %intent.timestamp,
                exit_price = trade.exit_price,
                pnl = trade.pnl,
                reason = %reason,
                stage = "execute",
                "position closed"
            );
            Ok(Some(Fill::Closed(trade)))
        }
        OrderPurpose::Unwind => {
            warn!(
                symbol,
                timestamp = %intent.timestamp,
                order_id = record.order_id,
                side = %record.side,
                quantity = record.quantity,
                stage = "execute",
                "unbookable fill offset"
            );
            Ok(None)
        }
    }
}

/// Send `intent` and book its fill. A fill the ledger refuses is offset
/// with an opposite order so broker and ledger stay flat together; the
/// booking error is still returned.
pub fn submit<E: OrderExecutor + ?Sized>(
    ledger: &mut PositionLedger,
    executor: &mut E,
    intent: &OrderIntent,
) -> Result<Option<Fill>, TradeError> {
    let record = intent.send(executor)?;
    match book_fill(ledger, intent, &record) {
        Ok(fill) => Ok(fill),
        Err(e) => {
            error!(
                symbol = %intent.symbol,
                timestamp = %intent.timestamp,
                order_id = record.order_id,
                error = %e,
                stage = "execute",
                "fill could not be booked, unwinding"
            );
            let unwind = intent.unwind(&record);
            if let Err(u) = unwind.send(executor).and_then(|r| book_fill(ledger, &unwind, &r)) {
                error!(
                    symbol = %intent.symbol,
                    error = %u,
                    stage = "execute",
                    "unwind failed, broker position differs from ledger"
                );
            }
            Err(e)
        }
    }
}

/// Sell the whole position at the bar close through the executor.
pub fn close_position<E: OrderExecutor + ?Sized>(
    ledger: &mut PositionLedger,
    executor: &mut E,
    symbol: &str,
    bar: &Bar,
    reason: ExitReason,
) -> Result<Trade, TradeError> {
    let intent = plan_exit(ledger, symbol, bar, reason)?;
    match submit(ledger, executor, &intent)? {
        Some(Fill::Closed(trade)) => Ok(trade),
        _ => Err(TradeError::InsufficientPosition {
            symbol: symbol.to_string(),
        }),
    }
}

/// Stop-loss / take-profit check for the current bar.
pub fn check_exits<E: OrderExecutor + ?Sized>(
    ledger: &mut PositionLedger,
    executor: &mut E,
    symbol: &str,
    bar: &Bar,
) -> Result<Option<Trade>, TradeError> {
    let Some(intent) = plan_triggered_exit(ledger, symbol, bar) else {
        return Ok(None);
    };
    match submit(ledger, executor, &intent)? {
        Some(Fill::Closed(trade)) => Ok(Some(trade)),
        _ => Ok(None),
    }
}

/// Plan and submit the order a scored signal calls for.
pub fn apply_signal<E: OrderExecutor + ?Sized>(
    ledger: &mut PositionLedger,
    executor: &mut E,
    config: &ExecutionConfig,
    signal: &Signal,
    bar: &Bar,
) -> Result<Option<Fill>, TradeError> {
    match plan_signal(ledger, config, signal, bar)? {
        Some(intent) => submit(ledger, executor, &intent),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated_executor::SimulatedExecutor;
    use crate::domain::signal::ComponentScores;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn bar(day: u32, close: f64) -> Bar {
        Bar {
            timestamp: ts(day),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000.0,
        }
    }

    fn signal(symbol: &str, day: u32, action: Action) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            timestamp: ts(day),
            action,
            strength: 1.0,
            components: ComponentScores::default(),
            reasons: vec![],
        }
    }

    #[test]
    fn size_position_uses_fraction_of_capital() {
        let config = ExecutionConfig::equity();
        assert_eq!(size_position(&config, "AAPL", 10_000.0, 100.0), Some(10.0));
    }

    #[test]
    fn size_position_floors_to_precision() {
        let config = ExecutionConfig::crypto();
        // 1000 * 0.1 / 30000 = 0.00333...
        let q = size_position(&config, "BTC/USD", 1_000.0, 30_000.0).unwrap();
        assert!((q - 0.00333333).abs() < 1e-12);
        assert!(q * 30_000.0 <= 100.0);

        let q = size_position(&config, "SOL/USD", 1_000.0, 30.0).unwrap();
        assert!((q - 3.3333).abs() < 1e-12);
    }

    #[test]
    fn size_position_below_minimum_is_none() {
        let config = ExecutionConfig::crypto();
        // 100 * 0.1 / 20 = 0.5 LINK, minimum is 1
        assert_eq!(size_position(&config, "LINK/USD", 100.0, 20.0), None);
    }

    #[test]
    fn size_position_rounding_to_zero_is_none() {
        let config = ExecutionConfig {
            default_precision: 0,
            ..ExecutionConfig::equity()
        };
        assert_eq!(size_position(&config, "BRK.A", 10_000.0, 600_000.0), None);
    }

    #[test]
    fn precision_prefix_rules() {
        let config = ExecutionConfig::crypto();
        assert_eq!(config.precision("BTC/USD"), 8);
        assert_eq!(config.precision("ETH/USD"), 6);
        assert_eq!(config.precision("DOT/USD"), 4);
    }

    #[test]
    fn stop_loss_wins_tie() {
        let pos = Position {
            symbol: "X".into(),
            quantity: 1.0,
            entry_price: 100.0,
            stop_loss: 100.0,
            take_profit: 100.0,
            opened_at: ts(1),
        };
        assert_eq!(exit_trigger(&pos, 100.0), Some(ExitReason::StopLoss));
        assert_eq!(exit_trigger(&pos, 101.0), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn buy_then_stop_out() {
        let config = ExecutionConfig::equity();
        let mut ledger = PositionLedger::new(10_000.0, 0.05, 0.10);
        let mut exec = SimulatedExecutor::new();

        let fill = apply_signal(&mut ledger, &mut exec, &config, &signal("AAPL", 1, Action::Buy), &bar(1, 100.0))
            .unwrap();
        assert_eq!(
            fill,
            Some(Fill::Opened {
                quantity: 10.0,
                price: 100.0
            })
        );

        assert!(check_exits(&mut ledger, &mut exec, "AAPL", &bar(2, 105.0)).unwrap().is_none());
        let trade = check_exits(&mut ledger, &mut exec, "AAPL", &bar(3, 95.0))
            .unwrap()
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert!((trade.pnl + 50.0).abs() < 1e-9);
        assert_eq!(exec.fills().len(), 2);
    }

    #[test]
    fn take_profit_exit() {
        let config = ExecutionConfig::equity();
        let mut ledger = PositionLedger::new(10_000.0, 0.05, 0.10);
        let mut exec = SimulatedExecutor::new();
        apply_signal(&mut ledger, &mut exec, &config, &signal("AAPL", 1, Action::Buy), &bar(1, 100.0))
            .unwrap();
        let trade = check_exits(&mut ledger, &mut exec, "AAPL", &bar(2, 111.0))
            .unwrap()
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert!((trade.pnl - 110.0).abs() < 1e-9);
    }

    #[test]
    fn sell_without_position_is_noop() {
        let config = ExecutionConfig::equity();
        let mut ledger = PositionLedger::new(10_000.0, 0.05, 0.10);
        let mut exec = SimulatedExecutor::new();
        let fill = apply_signal(&mut ledger, &mut exec, &config, &signal("AAPL", 1, Action::Sell), &bar(1, 100.0))
            .unwrap();
        assert!(fill.is_none());
        assert!(exec.fills().is_empty());
    }

    #[test]
    fn buy_while_long_is_noop() {
        let config = ExecutionConfig::equity();
        let mut ledger = PositionLedger::new(10_000.0, 0.05, 0.10);
        let mut exec = SimulatedExecutor::new();
        apply_signal(&mut ledger, &mut exec, &config, &signal("AAPL", 1, Action::Buy), &bar(1, 100.0))
            .unwrap();
        let fill = apply_signal(&mut ledger, &mut exec, &config, &signal("AAPL", 2, Action::Buy), &bar(2, 101.0))
            .unwrap();
        assert!(fill.is_none());
        assert_eq!(ledger.portfolio().position_count(), 1);
    }

    #[test]
    fn sell_signal_closes() {
        let config = ExecutionConfig::equity();
        let mut ledger = PositionLedger::new(10_000.0, 0.05, 0.10);
        let mut exec = SimulatedExecutor::new();
        apply_signal(&mut ledger, &mut exec, &config, &signal("AAPL", 1, Action::Buy), &bar(1, 100.0))
            .unwrap();
        match apply_signal(&mut ledger, &mut exec, &config, &signal("AAPL", 2, Action::Sell), &bar(2, 102.0))
            .unwrap()
        {
            Some(Fill::Closed(trade)) => {
                assert_eq!(trade.exit_reason, ExitReason::Signal);
                assert!((trade.pnl - 20.0).abs() < 1e-9);
            }
            other => panic!("expected close, got {:?}", other),
        }
    }

    /// Fills buys `slippage` above the requested price.
    struct SlippingExecutor {
        slippage: f64,
        inner: SimulatedExecutor,
    }

    impl OrderExecutor for SlippingExecutor {
        fn execute_trade(
            &mut self,
            symbol: &str,
            side: Side,
            quantity: f64,
            price: f64,
            timestamp: NaiveDateTime,
        ) -> Result<OrderRecord, TradeError> {
            let price = match side {
                Side::Buy => price + self.slippage,
                Side::Sell => price,
            };
            self.inner.execute_trade(symbol, side, quantity, price, timestamp)
        }
    }

    #[test]
    fn slipped_entry_books_reported_price() {
        let config = ExecutionConfig::equity();
        let mut ledger = PositionLedger::new(10_000.0, 0.05, 0.10);
        let mut exec = SlippingExecutor {
            slippage: 1.0,
            inner: SimulatedExecutor::new(),
        };
        let fill = apply_signal(&mut ledger, &mut exec, &config, &signal("AAPL", 1, Action::Buy), &bar(1, 100.0))
            .unwrap();
        assert_eq!(
            fill,
            Some(Fill::Opened {
                quantity: 10.0,
                price: 101.0
            })
        );
        assert!((ledger.cash() - 8_990.0).abs() < 1e-9);
    }

    #[test]
    fn unaffordable_fill_is_unwound() {
        let config = ExecutionConfig {
            max_position_fraction: 1.0,
            ..ExecutionConfig::equity()
        };
        let mut ledger = PositionLedger::new(1_000.0, 0.05, 0.10);
        let mut exec = SlippingExecutor {
            slippage: 1.0,
            inner: SimulatedExecutor::new(),
        };
        // 10 @ 100 fits the cash, the fill at 101 does not
        let err = apply_signal(&mut ledger, &mut exec, &config, &signal("AAPL", 1, Action::Buy), &bar(1, 100.0))
            .unwrap_err();
        assert!(matches!(err, TradeError::InsufficientFunds { .. }));
        assert!(ledger.position("AAPL").is_none());
        assert!((ledger.cash() - 1_000.0).abs() < 1e-9);

        let fills = exec.inner.fills();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].side, Side::Buy);
        assert_eq!(fills[1].side, Side::Sell);
        assert!((fills[1].quantity - fills[0].quantity).abs() < f64::EPSILON);
    }

    #[test]
    fn plan_signal_does_not_touch_the_ledger() {
        let config = ExecutionConfig::equity();
        let ledger = PositionLedger::new(10_000.0, 0.05, 0.10);
        let intent = plan_signal(&ledger, &config, &signal("AAPL", 1, Action::Buy), &bar(1, 100.0))
            .unwrap()
            .unwrap();
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.purpose, OrderPurpose::Entry);
        assert!((intent.quantity - 10.0).abs() < f64::EPSILON);
        assert!((ledger.cash() - 10_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn config_validation() {
        assert!(ExecutionConfig::equity().validate().is_ok());
        assert!(ExecutionConfig::crypto().validate().is_ok());
        let bad = ExecutionConfig {
            max_position_fraction: 1.5,
            ..ExecutionConfig::equity()
        };
        assert!(matches!(
            bad.validate(),
            Err(TradeError::InvalidConfiguration { .. })
        ));
    }
}
