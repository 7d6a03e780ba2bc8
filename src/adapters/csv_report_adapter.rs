//! CSV report writer.
//!
//! Produces one file per table so the output loads directly into a
//! spreadsheet or a dataframe:
//! `summary.csv`, `symbols.csv`, `equity.csv`, `trades.csv`, `signals.csv`
//! and `events.csv`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::domain::backtest::{RunResult, SymbolStatus};
use crate::domain::error::TradeError;
use crate::domain::metrics::PerformanceReport;
use crate::ports::report_port::ReportPort;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn summary_rows(report: &PerformanceReport) -> Vec<(&'static str, String)> {
    vec![
        ("initial_capital", format!("{:.2}", report.initial_capital)),
        ("final_equity", format!("{:.2}", report.final_equity)),
        ("total_return", format!("{:.6}", report.total_return)),
        ("sharpe_ratio", format!("{:.6}", report.sharpe_ratio)),
        ("sortino_ratio", format!("{:.6}", report.sortino_ratio)),
        ("max_drawdown", format!("{:.6}", report.max_drawdown)),
        (
            "max_drawdown_duration",
            report.max_drawdown_duration.to_string(),
        ),
        ("total_trades", report.total_trades.to_string()),
        ("winning_trades", report.winning_trades.to_string()),
        ("losing_trades", report.losing_trades.to_string()),
        ("win_rate", format!("{:.6}", report.win_rate)),
        ("total_pnl", format!("{:.2}", report.total_pnl)),
        ("avg_trade_pnl", format!("{:.2}", report.avg_trade_pnl)),
        (
            "avg_duration_secs",
            report.avg_duration.num_seconds().to_string(),
        ),
        ("profit_factor", format!("{:.6}", report.profit_factor)),
        ("largest_win", format!("{:.2}", report.largest_win)),
        ("largest_loss", format!("{:.2}", report.largest_loss)),
        (
            "sentiment_correlation",
            opt(report.sentiment_correlation.map(|c| format!("{:.6}", c))),
        ),
        (
            "optimal_sentiment_lag",
            opt(report.optimal_sentiment_lag),
        ),
        (
            "sentiment_events",
            report.event_summary.total_events.to_string(),
        ),
        (
            "positive_events",
            report.event_summary.positive_events.to_string(),
        ),
        (
            "negative_events",
            report.event_summary.negative_events.to_string(),
        ),
    ]
}

fn issue_ranges(status: &SymbolStatus) -> String {
    match status {
        SymbolStatus::Partial { issues } => issues
            .iter()
            .map(|i| {
                format!(
                    "{}..{} {}",
                    i.from.format(TIMESTAMP_FORMAT),
                    i.to.format(TIMESTAMP_FORMAT),
                    i.reason
                )
            })
            .collect::<Vec<_>>()
            .join("; "),
        SymbolStatus::Failed { cause } => cause.clone(),
        SymbolStatus::Complete => String::new(),
    }
}

fn status_label(status: &SymbolStatus) -> &'static str {
    match status {
        SymbolStatus::Complete => "complete",
        SymbolStatus::Partial { .. } => "partial",
        SymbolStatus::Failed { .. } => "failed",
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &RunResult, output_dir: &Path) -> Result<Vec<PathBuf>, TradeError> {
        fs::create_dir_all(output_dir)?;
        let mut written = Vec::new();

        let path = output_dir.join("summary.csv");
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record(["metric", "value"])?;
        for (metric, value) in summary_rows(&result.performance_report) {
            wtr.write_record([metric, value.as_str()])?;
        }
        wtr.flush()?;
        written.push(path);

        let path = output_dir.join("symbols.csv");
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record([
            "symbol",
            "status",
            "detail",
            "final_equity",
            "total_return",
            "trades",
            "sentiment_correlation",
        ])?;
        for sr in &result.symbol_results {
            let (final_equity, total_return, trades) = match &sr.report {
                Some(r) => (
                    format!("{:.2}", r.final_equity),
                    format!("{:.6}", r.total_return),
                    r.total_trades.to_string(),
                ),
                None => (String::new(), String::new(), String::new()),
            };
            wtr.write_record([
                sr.symbol.as_str(),
                status_label(&sr.status),
                issue_ranges(&sr.status).as_str(),
                final_equity.as_str(),
                total_return.as_str(),
                trades.as_str(),
                opt(sr.sentiment.correlation.map(|c| format!("{:.6}", c))).as_str(),
            ])?;
        }
        wtr.flush()?;
        written.push(path);

        let path = output_dir.join("equity.csv");
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record(["timestamp", "equity"])?;
        for point in &result.equity_curve {
            wtr.write_record([
                point.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                format!("{:.2}", point.equity),
            ])?;
        }
        wtr.flush()?;
        written.push(path);

        let path = output_dir.join("trades.csv");
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record([
            "symbol",
            "entry_time",
            "exit_time",
            "entry_price",
            "exit_price",
            "quantity",
            "pnl",
            "pnl_pct",
            "exit_reason",
        ])?;
        for t in &result.trade_log {
            wtr.write_record([
                t.symbol.clone(),
                t.entry_time.format(TIMESTAMP_FORMAT).to_string(),
                t.exit_time.format(TIMESTAMP_FORMAT).to_string(),
                format!("{:.4}", t.entry_price),
                format!("{:.4}", t.exit_price),
                format!("{}", t.quantity),
                format!("{:.2}", t.pnl),
                format!("{:.6}", t.pnl_pct),
                t.exit_reason.to_string(),
            ])?;
        }
        wtr.flush()?;
        written.push(path);

        let path = output_dir.join("signals.csv");
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record([
            "symbol",
            "timestamp",
            "action",
            "strength",
            "trend",
            "momentum",
            "volatility",
            "volume",
            "sentiment",
            "reasons",
        ])?;
        for s in &result.signals {
            let c = &s.components;
            wtr.write_record([
                s.symbol.clone(),
                s.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                s.action.to_string(),
                format!("{:.6}", s.strength),
                format!("{:.6}", c.trend),
                format!("{:.6}", c.momentum),
                format!("{:.6}", c.volatility),
                format!("{:.6}", c.volume),
                format!("{:.6}", c.sentiment),
                s.reasons.join("; "),
            ])?;
        }
        wtr.flush()?;
        written.push(path);

        let path = output_dir.join("events.csv");
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record([
            "symbol",
            "timestamp",
            "pre_move_sentiment",
            "z_score",
            "price_move",
            "post_count",
        ])?;
        for e in &result.performance_report.significant_events {
            wtr.write_record([
                e.symbol.clone(),
                e.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                format!("{:.6}", e.pre_move_sentiment),
                format!("{:.6}", e.z_score),
                format!("{:.6}", e.price_move),
                e.post_count.to_string(),
            ])?;
        }
        wtr.flush()?;
        written.push(path);

        info!(
            files = written.len(),
            dir = %output_dir.display(),
            stage = "report",
            "report written"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::{DataIssue, SymbolResult};
    use crate::domain::metrics::{AnalyzerConfig, SentimentImpact};
    use crate::domain::portfolio::EquityPoint;
    use crate::domain::position::{ExitReason, Trade};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn ts(day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample_result() -> RunResult {
        let equity_curve = vec![
            EquityPoint { timestamp: ts(1), equity: 10_000.0 },
            EquityPoint { timestamp: ts(2), equity: 10_100.0 },
        ];
        let trade = Trade {
            symbol: "AAPL".into(),
            entry_price: 100.0,
            exit_price: 110.0,
            quantity: 10.0,
            pnl: 100.0,
            pnl_pct: 0.1,
            entry_time: ts(1),
            exit_time: ts(2),
            exit_reason: ExitReason::EndOfRun,
        };
        let report = PerformanceReport::compute(
            10_000.0,
            &equity_curve,
            std::slice::from_ref(&trade),
            &AnalyzerConfig::default(),
        );
        let partial = SymbolStatus::Partial {
            issues: vec![DataIssue {
                from: ts(1),
                to: ts(2),
                reason: "gap".into(),
            }],
        };
        RunResult {
            equity_curve: equity_curve.clone(),
            trade_log: vec![trade.clone()],
            signals: vec![],
            performance_report: report.clone(),
            per_symbol_status: vec![("AAPL".into(), partial.clone())],
            symbol_results: vec![SymbolResult {
                symbol: "AAPL".into(),
                status: partial,
                equity_curve,
                trades: vec![trade],
                signals: vec![],
                final_cash: 10_100.0,
                report: Some(report),
                sentiment: SentimentImpact::default(),
            }],
        }
    }

    #[test]
    fn writes_all_tables() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("report");
        let files = CsvReportAdapter::new().write(&sample_result(), &out).unwrap();
        assert_eq!(files.len(), 6);
        for f in &files {
            assert!(f.is_file(), "{} missing", f.display());
        }
    }

    #[test]
    fn trades_and_summary_content() {
        let dir = TempDir::new().unwrap();
        CsvReportAdapter::new()
            .write(&sample_result(), dir.path())
            .unwrap();

        let trades = fs::read_to_string(dir.path().join("trades.csv")).unwrap();
        let mut lines = trades.lines();
        assert!(lines.next().unwrap().starts_with("symbol,entry_time"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("AAPL,2024-01-01 00:00:00,2024-01-02 00:00:00"));
        assert!(row.ends_with("end_of_run"));

        let summary = fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        assert!(summary.contains("final_equity,10100.00"));
        assert!(summary.contains("total_trades,1"));
        assert!(summary.lines().any(|l| l == "sentiment_correlation,"));
    }

    #[test]
    fn symbol_status_lists_issue_range() {
        let dir = TempDir::new().unwrap();
        CsvReportAdapter::new()
            .write(&sample_result(), dir.path())
            .unwrap();
        let symbols = fs::read_to_string(dir.path().join("symbols.csv")).unwrap();
        let row = symbols.lines().nth(1).unwrap();
        assert!(row.starts_with("AAPL,partial,2024-01-01 00:00:00..2024-01-02 00:00:00 gap,"));
    }
}
