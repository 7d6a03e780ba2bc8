//! End-to-end engine tests through the provider ports.

mod common;

use approx::assert_relative_eq;
use common::*;
use proptest::prelude::*;
use sentitrade::adapters::simulated_executor::SimulatedExecutor;
use sentitrade::domain::backtest::{BacktestConfig, BacktestEngine, EngineState, SymbolStatus};
use sentitrade::domain::error::TradeError;
use sentitrade::domain::ledger::PositionLedger;
use sentitrade::domain::metrics::{AnalyzerConfig, PerformanceReport};
use sentitrade::domain::portfolio::EquityPoint;
use sentitrade::domain::position::ExitReason;
use sentitrade::domain::sentiment::{CorrelatorConfig, SentimentCorrelator, Side};
use sentitrade::domain::signal::{Action, ScoringConfig, SignalScorer};
use sentitrade::ports::sentiment_port::SentimentProvider;
use std::collections::HashMap;

fn correlator() -> SentimentCorrelator {
    SentimentCorrelator::new(CorrelatorConfig::default()).unwrap()
}

fn scripted_engine(
    actions: Vec<Action>,
    config: BacktestConfig,
) -> BacktestEngine<ScriptedScorer, SimulatedExecutor> {
    BacktestEngine::new(
        config,
        ScriptedScorer(actions),
        SimulatedExecutor::new(),
        correlator(),
    )
    .unwrap()
}

fn capital(initial_capital: f64) -> BacktestConfig {
    BacktestConfig {
        initial_capital,
        ..Default::default()
    }
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

mod scenarios {
    use super::*;

    #[test]
    fn stop_loss_checked_before_scoring() {
        use Action::*;
        let market = MockMarket::new().with_bars("AAPL", make_bars(&[100.0, 105.0, 95.0, 115.0]));
        let mut engine = scripted_engine(vec![Buy, Hold, Sell, Hold], capital(10_000.0));

        let result = engine.run(&market, None, &symbols(&["AAPL"])).unwrap();

        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(result.trade_log.len(), 1);
        let trade = &result.trade_log[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_relative_eq!(trade.quantity, 10.0);
        assert_relative_eq!(trade.entry_price, 100.0);
        assert_relative_eq!(trade.exit_price, 95.0);
        assert_relative_eq!(trade.pnl, -50.0, epsilon = 1e-9);
        assert_eq!(trade.exit_time, ts(2));

        let sr = result.symbol_result("AAPL").unwrap();
        assert_eq!(sr.status, SymbolStatus::Complete);
        assert_relative_eq!(sr.final_cash, 9_950.0, epsilon = 1e-9);
        // the scripted SELL on the stop bar found nothing to close
        assert_eq!(sr.signals.len(), 4);
    }

    #[test]
    fn gap_in_one_symbol_does_not_affect_the_other() {
        let a = make_bars(&wave(30, 100.0));
        let b: Vec<Bar> = make_bars(&wave(30, 50.0))
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !(10..20).contains(i))
            .map(|(_, bar)| bar)
            .collect();
        let market = MockMarket::new().with_bars("A", a).with_bars("B", b);

        // no gap limit configured: derived from the bar spacing
        let config = BacktestConfig {
            initial_capital: 10_000.0,
            ..Default::default()
        };
        let mut engine = scripted_engine(vec![Action::Hold; 30], config);
        let result = engine.run(&market, None, &symbols(&["A", "B"])).unwrap();

        assert_eq!(result.status_of("A"), Some(&SymbolStatus::Complete));
        let a = result.symbol_result("A").unwrap();
        assert!(a.report.is_some());
        assert_eq!(a.equity_curve.len(), 30);

        match result.status_of("B") {
            Some(SymbolStatus::Partial { issues }) => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].from, ts(9));
                assert_eq!(issues[0].to, ts(20));
            }
            other => panic!("expected partial status, got {:?}", other),
        }
        assert_eq!(result.symbol_result("B").unwrap().equity_curve.len(), 20);

        // both symbols idle: combined capital throughout
        assert_relative_eq!(result.performance_report.initial_capital, 20_000.0);
        assert_eq!(result.equity_curve.len(), 30);
        for p in &result.equity_curve {
            assert_relative_eq!(p.equity, 20_000.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn sentiment_overreaction_trades_against_the_crowd() {
        let bars = make_bars(&wave(13, 100.0));
        let flat = make_bars(&[100.0; 60]);

        let chasing = sentiment_tracking_returns(&bars, 10.0, 5);
        let reading = correlator().read("AAPL", &bars, &chasing).unwrap();
        assert_relative_eq!(reading.correlation, 1.0, epsilon = 1e-9);
        assert!(reading.overreaction);
        assert_eq!(reading.side, Side::Sell);
        let mut scorer = SignalScorer::new(ScoringConfig::equity()).unwrap();
        let signal = scorer_signal(&mut scorer, &flat, &reading);
        assert_eq!(signal, Action::Sell);

        let fading = sentiment_tracking_returns(&bars, -10.0, 5);
        let reading = correlator().read("AAPL", &bars, &fading).unwrap();
        assert_relative_eq!(reading.correlation, -1.0, epsilon = 1e-9);
        assert_eq!(reading.side, Side::Buy);
        let mut scorer = SignalScorer::new(ScoringConfig::equity()).unwrap();
        assert_eq!(scorer_signal(&mut scorer, &flat, &reading), Action::Buy);
    }

    fn scorer_signal(
        scorer: &mut SignalScorer,
        bars: &[Bar],
        reading: &sentitrade::domain::sentiment::SentimentReading,
    ) -> Action {
        use sentitrade::domain::signal::Scorer;
        scorer.score("AAPL", bars, Some(reading)).unwrap().action
    }

    #[test]
    fn too_few_posts_means_no_sentiment_signal() {
        let bars = make_bars(&wave(13, 100.0));
        // 12 samples x 1 post < 20
        let thin = sentiment_tracking_returns(&bars, 10.0, 1);
        assert!(correlator().read("AAPL", &bars, &thin).is_none());
    }
}

mod engine {
    use super::*;

    #[test]
    fn failed_fetch_isolated_per_symbol() {
        let market = MockMarket::new()
            .with_bars("GOOD", make_bars(&[10.0, 11.0, 12.0]))
            .with_error("BAD", "feed down");
        let mut engine = scripted_engine(vec![Action::Hold; 3], capital(1_000.0));
        let result = engine.run(&market, None, &symbols(&["BAD", "GOOD"])).unwrap();

        assert_eq!(result.per_symbol_status.len(), 2);
        assert_eq!(result.per_symbol_status[0].0, "BAD");
        match result.status_of("BAD") {
            Some(SymbolStatus::Failed { cause }) => assert!(cause.contains("feed down")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(result.status_of("GOOD"), Some(&SymbolStatus::Complete));
        assert!(result.symbol_result("BAD").unwrap().report.is_none());
        assert_relative_eq!(result.performance_report.initial_capital, 1_000.0);
    }

    #[test]
    fn every_symbol_failing_is_an_error() {
        let market = MockMarket::new().with_error("X", "nope");
        let mut engine = scripted_engine(vec![], capital(1_000.0));
        let err = engine.run(&market, None, &symbols(&["X"])).unwrap_err();
        assert!(matches!(err, TradeError::DataUnavailable { .. }));
        assert_eq!(engine.state(), EngineState::Error);
    }

    #[test]
    fn sentiment_series_is_loaded_and_analyzed() {
        let bars = make_bars(&wave(40, 100.0));
        let sentiment = sentiment_tracking_returns(&bars, 10.0, 30);
        let market = MockMarket::new()
            .with_bars("AAPL", bars)
            .with_sentiment("AAPL", sentiment);
        let mut engine = scripted_engine(vec![Action::Hold; 40], capital(10_000.0));

        let result = engine
            .run(&market, Some(&market as &dyn SentimentProvider), &symbols(&["AAPL"]))
            .unwrap();
        let corr = result.performance_report.sentiment_correlation.unwrap();
        assert_relative_eq!(corr, 1.0, epsilon = 1e-9);
        assert_eq!(result.performance_report.optimal_sentiment_lag, Some(0));
    }

    #[test]
    fn identical_inputs_identical_results() {
        let market = MockMarket::new()
            .with_bars("A", make_bars(&wave(120, 100.0)))
            .with_bars("B", make_bars(&wave(120, 40.0)));
        let run = || {
            let mut engine = BacktestEngine::new(
                capital(50_000.0),
                SignalScorer::new(ScoringConfig::equity()).unwrap(),
                SimulatedExecutor::new(),
                correlator(),
            )
            .unwrap();
            engine.run(&market, None, &symbols(&["A", "B"])).unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.trade_log, second.trade_log);
        assert_eq!(first.equity_curve, second.equity_curve);
        assert_eq!(first.signals, second.signals);
        assert_eq!(first.performance_report, second.performance_report);
    }

    #[test]
    fn parallel_replay_matches_sequential() {
        let market = MockMarket::new()
            .with_bars("A", make_bars(&wave(90, 100.0)))
            .with_bars("B", make_bars(&wave(90, 60.0)))
            .with_bars("C", make_bars(&wave(90, 20.0)));
        let run = |parallel: bool| {
            let config = BacktestConfig {
                initial_capital: 10_000.0,
                parallel,
                ..Default::default()
            };
            let mut engine = BacktestEngine::new(
                config,
                SignalScorer::new(ScoringConfig::crypto()).unwrap(),
                SimulatedExecutor::new(),
                correlator(),
            )
            .unwrap();
            engine.run(&market, None, &symbols(&["A", "B", "C"])).unwrap()
        };
        let seq = run(false);
        let par = run(true);
        assert_eq!(seq.trade_log, par.trade_log);
        assert_eq!(seq.equity_curve, par.equity_curve);
    }
}

mod live {
    use super::*;
    use sentitrade::domain::execution::ExecutionConfig;
    use sentitrade::domain::live::{LiveBot, LiveConfig, SharedMarket, SharedSentiment};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn fast_config(max_cycles: Option<usize>) -> LiveConfig {
        LiveConfig {
            cycle_interval: StdDuration::from_millis(1),
            call_timeout: StdDuration::from_millis(500),
            max_cycles,
            ..LiveConfig::new("AAPL")
        }
    }

    #[test]
    fn runs_requested_cycles_and_trades() {
        use Action::*;
        let market = Arc::new(MockMarket::new().with_bars("AAPL", make_bars(&wave(40, 100.0))));
        let bot = LiveBot::spawn(
            fast_config(Some(3)),
            SequenceScorer::new(vec![Buy, Hold, Hold]),
            correlator(),
            ExecutionConfig::equity(),
            SimulatedExecutor::new(),
            market.clone() as SharedMarket,
            Some(market.clone() as SharedSentiment),
        )
        .unwrap();
        assert_eq!(bot.name(), "bot-AAPL");

        let summary = bot.join().unwrap();
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.skipped_cycles, 0);
        assert_eq!(summary.signals.len(), 3);
        assert_eq!(summary.signals[0].action, Buy);
        assert!(summary.cash < 10_000.0);
        // bought and marked at the same quote every cycle
        assert_relative_eq!(summary.last_equity.unwrap(), 10_000.0, epsilon = 1e-6);
        assert!(market.fetch_count() >= 3);
    }

    #[test]
    fn slow_provider_skips_cycles() {
        let market = Arc::new(SlowMarket {
            delay: StdDuration::from_millis(300),
        });
        let config = LiveConfig {
            call_timeout: StdDuration::from_millis(20),
            ..fast_config(Some(2))
        };
        let bot = LiveBot::spawn(
            config,
            SequenceScorer::new(vec![Action::Buy]),
            correlator(),
            ExecutionConfig::equity(),
            SimulatedExecutor::new(),
            market as SharedMarket,
            None,
        )
        .unwrap();

        let summary = bot.join().unwrap();
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.skipped_cycles, 2);
        assert!(summary.signals.is_empty());
        assert_relative_eq!(summary.cash, 10_000.0);
    }

    #[test]
    fn stop_cancels_a_sleeping_bot() {
        let market = Arc::new(MockMarket::new().with_bars("AAPL", make_bars(&wave(40, 100.0))));
        let config = LiveConfig {
            cycle_interval: StdDuration::from_secs(60),
            ..fast_config(None)
        };
        let bot = LiveBot::spawn(
            config,
            SequenceScorer::new(vec![]),
            correlator(),
            ExecutionConfig::equity(),
            SimulatedExecutor::new(),
            market as SharedMarket,
            None,
        )
        .unwrap();

        std::thread::sleep(StdDuration::from_millis(50));
        let started = std::time::Instant::now();
        let summary = bot.stop().unwrap();
        assert!(started.elapsed() < StdDuration::from_secs(5));
        assert!(summary.cycles <= 1);
    }

    #[test]
    fn order_past_deadline_is_booked_when_it_fills() {
        let market = Arc::new(MockMarket::new().with_bars("AAPL", make_bars(&[100.0; 30])));
        let fills = Arc::new(AtomicUsize::new(0));
        let config = LiveConfig {
            call_timeout: StdDuration::from_millis(30),
            ..fast_config(None)
        };
        let bot = LiveBot::spawn(
            config,
            SequenceScorer::new(vec![Action::Buy]),
            correlator(),
            ExecutionConfig::equity(),
            SlowExecutor::new(StdDuration::from_millis(150), Arc::clone(&fills)),
            market as SharedMarket,
            None,
        )
        .unwrap();

        std::thread::sleep(StdDuration::from_millis(400));
        let summary = bot.stop().unwrap();

        // the broker filled once and the ledger holds exactly that fill
        assert_eq!(fills.load(Ordering::SeqCst), 1);
        assert_eq!(summary.late_fills, 1);
        assert!(summary.skipped_cycles >= 1);
        assert!(summary.outstanding_order.is_none());
        assert_eq!(summary.open_positions.len(), 1);
        assert_relative_eq!(summary.open_positions[0].quantity, 10.0);
        assert_relative_eq!(summary.cash, 9_000.0, epsilon = 1e-9);
    }

    #[test]
    fn unanswered_order_is_reported_on_stop() {
        let market = Arc::new(MockMarket::new().with_bars("AAPL", make_bars(&[100.0; 30])));
        let fills = Arc::new(AtomicUsize::new(0));
        let config = LiveConfig {
            call_timeout: StdDuration::from_millis(30),
            ..fast_config(None)
        };
        let bot = LiveBot::spawn(
            config,
            SequenceScorer::new(vec![Action::Buy]),
            correlator(),
            ExecutionConfig::equity(),
            SlowExecutor::new(StdDuration::from_millis(800), Arc::clone(&fills)),
            market as SharedMarket,
            None,
        )
        .unwrap();

        std::thread::sleep(StdDuration::from_millis(100));
        let summary = bot.stop().unwrap();

        let outstanding = summary.outstanding_order.expect("order still outstanding");
        assert_eq!(outstanding.side, Side::Buy);
        assert_relative_eq!(outstanding.quantity, 10.0);
        assert!(summary.open_positions.is_empty());
        assert_relative_eq!(summary.cash, 10_000.0);
    }

    #[test]
    fn invalid_config_is_rejected_before_spawning() {
        let market = Arc::new(MockMarket::new());
        let config = LiveConfig {
            initial_capital: 0.0,
            ..LiveConfig::new("AAPL")
        };
        let result = LiveBot::spawn(
            config,
            SequenceScorer::new(vec![]),
            correlator(),
            ExecutionConfig::equity(),
            SimulatedExecutor::new(),
            market as SharedMarket,
            None,
        );
        assert!(matches!(result, Err(TradeError::InvalidConfiguration { .. })));
    }
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![Just(Action::Buy), Just(Action::Sell), Just(Action::Hold)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn equity_is_cash_plus_holdings(
        ops in prop::collection::vec((any::<bool>(), 1.0f64..200.0, 0.1f64..80.0), 1..40)
    ) {
        let mut ledger = PositionLedger::new(10_000.0, 0.05, 0.10);
        for (day, (open, price, qty)) in ops.into_iter().enumerate() {
            let before = ledger.portfolio().clone();
            let outcome = if open {
                ledger.open("X", price, qty, ts(day)).map(|_| ())
            } else {
                ledger.close("X", price, ts(day), ExitReason::Signal).map(|_| ())
            };
            if outcome.is_err() {
                prop_assert_eq!(ledger.portfolio(), &before);
            }

            let prices = HashMap::from([("X".to_string(), price)]);
            let equity = ledger.record_equity(ts(day), &prices);
            let holdings = ledger.position("X").map(|p| p.quantity * price).unwrap_or(0.0);
            let expected = ledger.cash() + holdings;
            prop_assert!((equity - expected).abs() <= 1e-6 * expected.abs().max(1.0));
            prop_assert!(ledger.cash() >= -1e-9);
        }
    }

    #[test]
    fn drawdown_is_bounded(values in prop::collection::vec(1.0f64..1_000_000.0, 1..60)) {
        let curve: Vec<EquityPoint> = values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint { timestamp: ts(i), equity })
            .collect();
        let report = PerformanceReport::compute(values[0], &curve, &[], &AnalyzerConfig::default());
        prop_assert!(report.max_drawdown <= 0.0);
        prop_assert!(report.max_drawdown >= -1.0);
        prop_assert_eq!(report.sharpe_ratio, 0.0);
    }

    #[test]
    fn replay_ends_flat_with_consistent_equity(
        closes in prop::collection::vec(5.0f64..500.0, 2..40),
        actions in prop::collection::vec(action_strategy(), 40),
    ) {
        let market = MockMarket::new().with_bars("P", make_bars(&closes));
        let mut engine = scripted_engine(actions, capital(10_000.0));
        let result = engine.run(&market, None, &symbols(&["P"])).unwrap();
        let sr = result.symbol_result("P").unwrap();

        let last = sr.equity_curve.last().unwrap().equity;
        prop_assert!((last - sr.final_cash).abs() <= 1e-6 * last.abs().max(1.0));
        prop_assert!(result.performance_report.max_drawdown >= -1.0);
        prop_assert!(result.performance_report.max_drawdown <= 0.0);
        let pnl: f64 = sr.trades.iter().map(|t| t.pnl).sum();
        prop_assert!((sr.final_cash - 10_000.0 - pnl).abs() <= 1e-6 * 10_000.0);
    }
}
