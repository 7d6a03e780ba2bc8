//! Composite technical + sentiment signal scoring.
//!
//! Four technical sub-scores (trend, momentum, volatility, volume), each in
//! [-1, 1], are weighted into a raw score. An overreaction reading from the
//! sentiment correlator adds a contrarian cue. Volume and volatility regime
//! multipliers then scale the total, and the result is normalized by the
//! largest absolute raw score seen over the scorer's recent history.
//!
//! One engine serves every market. Market differences live in the
//! immutable [`ScoringConfig`] profiles.

use std::collections::VecDeque;
use std::fmt;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use super::error::TradeError;
use super::indicator::{
    IndicatorValue, calculate_adx, calculate_atr, calculate_bollinger, calculate_cci,
    calculate_ema, calculate_macd, calculate_obv, calculate_rsi, calculate_stochastic,
    calculate_vpt, volume_ratio,
};
use super::ohlcv::Bar;
use super::sentiment::{CorrelatorConfig, SentimentReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComponentScores {
    pub trend: f64,
    pub momentum: f64,
    pub volatility: f64,
    pub volume: f64,
    pub sentiment: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Signal {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub action: Action,
    /// Normalized score in [-1, 1].
    pub strength: f64,
    pub components: ComponentScores,
    pub reasons: Vec<String>,
}

impl Signal {
    pub fn hold(symbol: &str, timestamp: NaiveDateTime, reason: impl Into<String>) -> Self {
        Signal {
            symbol: symbol.to_string(),
            timestamp,
            action: Action::Hold,
            strength: 0.0,
            components: ComponentScores::default(),
            reasons: vec![reason.into()],
        }
    }
}

/// Anything that turns a price window into a signal. The backtest engine
/// clones one prototype per symbol, so implementations may keep per-symbol
/// state.
pub trait Scorer: Clone {
    fn score(
        &mut self,
        symbol: &str,
        bars: &[Bar],
        sentiment: Option<&SentimentReading>,
    ) -> Option<Signal>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    pub trend: f64,
    pub momentum: f64,
    pub volatility: f64,
    pub volume: f64,
    pub sentiment: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger: usize,
    pub bollinger_mult_x100: u32,
    pub atr: usize,
    pub adx: usize,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub cci: usize,
    pub volume_sma: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        IndicatorParams {
            ema_fast: 20,
            ema_slow: 50,
            rsi: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger: 20,
            bollinger_mult_x100: 200,
            atr: 14,
            adx: 14,
            stoch_k: 14,
            stoch_d: 3,
            cci: 20,
            volume_sma: 20,
        }
    }
}

impl IndicatorParams {
    /// Shortest window on which every indicator is defined.
    pub fn min_bars(&self) -> usize {
        [
            self.ema_slow,
            self.rsi + 1,
            self.macd_slow + self.macd_signal - 1,
            self.bollinger,
            self.atr,
            2 * self.adx,
            self.stoch_k + self.stoch_d - 1,
            self.cci,
            self.volume_sma,
            2,
        ]
        .into_iter()
        .max()
        .unwrap_or(2)
    }

    fn validate(&self) -> Result<(), TradeError> {
        let periods = [
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
            ("rsi_period", self.rsi),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("bollinger_period", self.bollinger),
            ("atr_period", self.atr),
            ("adx_period", self.adx),
            ("stoch_k", self.stoch_k),
            ("stoch_d", self.stoch_d),
            ("cci_period", self.cci),
            ("volume_sma", self.volume_sma),
        ];
        for (key, period) in periods {
            if period == 0 {
                return Err(TradeError::invalid_config("signal", key, "must be positive"));
            }
        }
        if self.ema_fast >= self.ema_slow {
            return Err(TradeError::invalid_config(
                "signal",
                "ema_fast",
                "must be shorter than ema_slow",
            ));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(TradeError::invalid_config(
                "signal",
                "macd_fast",
                "must be shorter than macd_slow",
            ));
        }
        if self.bollinger_mult_x100 == 0 {
            return Err(TradeError::invalid_config(
                "signal",
                "bollinger_stddev",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub profile: String,
    pub weights: Weights,
    /// |normalized| at or above this yields BUY/SELL.
    pub action_threshold: f64,
    /// Volume ratio above which the total is boosted.
    pub volume_multiplier: f64,
    pub volume_boost: f64,
    /// Acceptable ATR/close range. `None` disables the regime adjustment.
    pub volatility_range: Option<(f64, f64)>,
    pub volatility_amplify: f64,
    pub volatility_dampen: f64,
    /// Raw scores remembered for normalization.
    pub normalization_window: usize,
    /// Trailing bars fed to the indicators.
    pub max_lookback: usize,
    /// Any non-zero score trades, regardless of threshold.
    pub force_decision: bool,
    pub indicators: IndicatorParams,
    pub correlator: CorrelatorConfig,
}

impl ScoringConfig {
    pub fn equity() -> Self {
        ScoringConfig {
            profile: "equity".to_string(),
            weights: Weights {
                trend: 1.0,
                momentum: 1.0,
                volatility: 1.0,
                volume: 0.5,
                sentiment: 0.3,
            },
            action_threshold: 0.5,
            volume_multiplier: 1.5,
            volume_boost: 1.2,
            volatility_range: None,
            volatility_amplify: 1.2,
            volatility_dampen: 0.5,
            normalization_window: 50,
            max_lookback: 250,
            force_decision: false,
            indicators: IndicatorParams::default(),
            correlator: CorrelatorConfig::default(),
        }
    }

    pub fn crypto() -> Self {
        ScoringConfig {
            profile: "crypto".to_string(),
            action_threshold: 0.6,
            volume_boost: 1.5,
            volatility_range: Some((0.01, 0.10)),
            correlator: CorrelatorConfig {
                overreaction_threshold: 0.5,
                ..CorrelatorConfig::default()
            },
            ..ScoringConfig::equity()
        }
    }

    pub fn forced() -> Self {
        ScoringConfig {
            profile: "forced".to_string(),
            weights: Weights {
                trend: 0.3,
                momentum: 0.3,
                volatility: 0.2,
                volume: 0.2,
                sentiment: 0.3,
            },
            action_threshold: 0.3,
            force_decision: true,
            correlator: CorrelatorConfig {
                overreaction_threshold: 0.5,
                ..CorrelatorConfig::default()
            },
            ..ScoringConfig::equity()
        }
    }

    pub fn from_profile(name: &str) -> Result<Self, TradeError> {
        match name.to_ascii_lowercase().as_str() {
            "equity" => Ok(Self::equity()),
            "crypto" => Ok(Self::crypto()),
            "forced" => Ok(Self::forced()),
            other => Err(TradeError::invalid_config(
                "signal",
                "profile",
                format!("unknown profile '{}' (expected equity, crypto or forced)", other),
            )),
        }
    }

    pub fn validate(&self) -> Result<(), TradeError> {
        let w = &self.weights;
        let weights = [
            ("weight_trend", w.trend),
            ("weight_momentum", w.momentum),
            ("weight_volatility", w.volatility),
            ("weight_volume", w.volume),
            ("weight_sentiment", w.sentiment),
        ];
        for (key, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(TradeError::invalid_config(
                    "signal",
                    key,
                    format!("must be finite and non-negative, got {}", value),
                ));
            }
        }
        if w.trend + w.momentum + w.volatility + w.volume <= 0.0 {
            return Err(TradeError::invalid_config(
                "signal",
                "weights",
                "technical weights must have a positive sum",
            ));
        }
        let t = self.action_threshold;
        if !t.is_finite() || t <= 0.0 || t > 1.0 {
            return Err(TradeError::invalid_config(
                "signal",
                "action_threshold",
                format!("must be in (0, 1], got {}", t),
            ));
        }
        if !self.volume_multiplier.is_finite() || self.volume_multiplier <= 0.0 {
            return Err(TradeError::invalid_config(
                "signal",
                "volume_multiplier",
                "must be positive",
            ));
        }
        for (key, v) in [
            ("volume_boost", self.volume_boost),
            ("volatility_amplify", self.volatility_amplify),
            ("volatility_dampen", self.volatility_dampen),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(TradeError::invalid_config("signal", key, "must be positive"));
            }
        }
        if let Some((lo, hi)) = self.volatility_range {
            if !(lo.is_finite() && hi.is_finite() && lo >= 0.0 && lo < hi) {
                return Err(TradeError::invalid_config(
                    "signal",
                    "volatility_range",
                    format!("need 0 <= min < max, got [{}, {}]", lo, hi),
                ));
            }
        }
        if self.normalization_window == 0 {
            return Err(TradeError::invalid_config(
                "signal",
                "normalization_window",
                "must be positive",
            ));
        }
        self.indicators.validate()?;
        if self.max_lookback < self.indicators.min_bars() {
            return Err(TradeError::invalid_config(
                "signal",
                "max_lookback",
                format!(
                    "must cover the longest indicator window ({} bars)",
                    self.indicators.min_bars()
                ),
            ));
        }
        self.correlator.validate()
    }

    /// Discrete action for a normalized score.
    pub fn action_for(&self, normalized: f64) -> Action {
        if normalized >= self.action_threshold {
            Action::Buy
        } else if normalized <= -self.action_threshold {
            Action::Sell
        } else if self.force_decision && normalized > 0.0 {
            Action::Buy
        } else if self.force_decision && normalized < 0.0 {
            Action::Sell
        } else {
            Action::Hold
        }
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct SignalScorer {
    config: ScoringConfig,
    raw_history: VecDeque<f64>,
}

impl SignalScorer {
    pub fn new(config: ScoringConfig) -> Result<Self, TradeError> {
        config.validate()?;
        Ok(SignalScorer {
            raw_history: VecDeque::with_capacity(config.normalization_window),
            config,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    fn trend(&self, bars: &[Bar], reasons: &mut Vec<String>) -> f64 {
        let p = &self.config.indicators;
        let fast = calculate_ema(bars, p.ema_fast).latest_simple();
        let slow = calculate_ema(bars, p.ema_slow).latest_simple();
        let adx = match calculate_adx(bars, p.adx).latest() {
            Some(IndicatorValue::Adx { adx, .. }) => Some(*adx),
            _ => None,
        };

        let (Some(fast), Some(slow)) = (fast, slow) else {
            return 0.0;
        };
        let direction = sign(fast - slow);
        if direction > 0.0 {
            reasons.push(format!("EMA({}) above EMA({})", p.ema_fast, p.ema_slow));
        } else if direction < 0.0 {
            reasons.push(format!("EMA({}) below EMA({})", p.ema_fast, p.ema_slow));
        }
        let strength = adx.map(|a| (a / 50.0).min(1.0)).unwrap_or(0.0);
        direction * (0.5 + 0.5 * strength)
    }

    fn momentum(&self, bars: &[Bar], reasons: &mut Vec<String>) -> f64 {
        let p = &self.config.indicators;
        let mut score = 0.0;

        if let Some(rsi) = calculate_rsi(bars, p.rsi).latest_simple() {
            score += 0.4 * (50.0 - rsi) / 50.0;
            if rsi < 30.0 {
                reasons.push(format!("RSI oversold ({:.1})", rsi));
            } else if rsi > 70.0 {
                reasons.push(format!("RSI overbought ({:.1})", rsi));
            }
        }

        if let Some(IndicatorValue::Macd { line, signal, .. }) =
            calculate_macd(bars, p.macd_fast, p.macd_slow, p.macd_signal).latest()
        {
            score += 0.3 * sign(line - signal);
        }

        if let Some(IndicatorValue::Stochastic { k, .. }) =
            calculate_stochastic(bars, p.stoch_k, p.stoch_d).latest()
        {
            if *k < 20.0 {
                score += 0.15;
                reasons.push("Stochastic oversold".to_string());
            } else if *k > 80.0 {
                score -= 0.15;
                reasons.push("Stochastic overbought".to_string());
            }
        }

        if let Some(cci) = calculate_cci(bars, p.cci).latest_simple() {
            if cci < -100.0 {
                score += 0.15;
                reasons.push("CCI oversold".to_string());
            } else if cci > 100.0 {
                score -= 0.15;
                reasons.push("CCI overbought".to_string());
            }
        }
        score
    }

    /// Returns (sub-score, ATR/close, band breached).
    fn volatility(&self, bars: &[Bar], close: f64, reasons: &mut Vec<String>) -> (f64, f64, bool) {
        let p = &self.config.indicators;
        let atr_norm = calculate_atr(bars, p.atr)
            .latest_simple()
            .map(|atr| atr / close)
            .unwrap_or(0.0);

        let bands = calculate_bollinger(bars, p.bollinger, p.bollinger_mult_x100);
        let Some(&IndicatorValue::Bollinger { upper, middle, .. }) = bands.latest() else {
            return (0.0, atr_norm, false);
        };
        let half_width = upper - middle;
        let position = if half_width > 0.0 {
            (close - middle) / half_width
        } else {
            0.0
        };
        let breached = position.abs() > 1.0;
        if position > 1.0 {
            reasons.push("Price above upper Bollinger band".to_string());
        } else if position < -1.0 {
            reasons.push("Price below lower Bollinger band".to_string());
        }
        (-position.clamp(-1.0, 1.0) / (1.0 + atr_norm), atr_norm, breached)
    }

    fn volume(&self, bars: &[Bar], reasons: &mut Vec<String>) -> f64 {
        let obv = calculate_obv(bars).latest_slope().map(sign).unwrap_or(0.0);
        let vpt = calculate_vpt(bars).latest_slope().map(sign).unwrap_or(0.0);
        if obv > 0.0 && vpt > 0.0 {
            reasons.push("Volume flow rising".to_string());
        } else if obv < 0.0 && vpt < 0.0 {
            reasons.push("Volume flow falling".to_string());
        }
        0.5 * obv + 0.5 * vpt
    }

    fn normalize(&mut self, raw: f64) -> f64 {
        if self.raw_history.len() == self.config.normalization_window {
            self.raw_history.pop_front();
        }
        self.raw_history.push_back(raw.abs());
        let max = self.raw_history.iter().copied().fold(0.0, f64::max);
        if max > 0.0 {
            (raw / max).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Scorer for SignalScorer {
    fn score(
        &mut self,
        symbol: &str,
        bars: &[Bar],
        sentiment: Option<&SentimentReading>,
    ) -> Option<Signal> {
        let min_bars = self.config.indicators.min_bars();
        if bars.len() < min_bars {
            debug!(
                symbol,
                bars = bars.len(),
                min_bars,
                stage = "score",
                "price window too short, no signal"
            );
            return None;
        }
        let start = bars.len().saturating_sub(self.config.max_lookback);
        let window = &bars[start..];
        let last = window.last()?;
        let timestamp = last.timestamp;

        if !last.is_usable() {
            warn!(
                symbol,
                %timestamp,
                close = last.close,
                stage = "score",
                "unusable close, holding"
            );
            return Some(Signal::hold(symbol, timestamp, "unusable close"));
        }

        let mut reasons = Vec::new();
        let trend = self.trend(window, &mut reasons);
        let momentum = self.momentum(window, &mut reasons);
        let (volatility, atr_norm, breached) = self.volatility(window, last.close, &mut reasons);
        let volume = self.volume(window, &mut reasons);

        let w = &self.config.weights;
        let mut raw = w.trend * trend
            + w.momentum * momentum
            + w.volatility * volatility
            + w.volume * volume;

        let mut sentiment_score = 0.0;
        if let Some(reading) = sentiment.filter(|r| r.overreaction) {
            sentiment_score = reading.side.sign() * reading.correlation.abs();
            raw += w.sentiment * sentiment_score;
            reasons.push(format!(
                "Sentiment overreaction (corr {:.2}) favours {}",
                reading.correlation, reading.side
            ));
        }

        if let Some(ratio) = volume_ratio(window, self.config.indicators.volume_sma) {
            if ratio > self.config.volume_multiplier {
                raw *= self.config.volume_boost;
                reasons.push(format!("High volume ({:.2}x average)", ratio));
            }
        }

        if let Some((lo, hi)) = self.config.volatility_range {
            if (lo..=hi).contains(&atr_norm) {
                if breached {
                    raw *= self.config.volatility_amplify;
                    reasons.push("Band breach in acceptable volatility".to_string());
                }
            } else {
                raw *= self.config.volatility_dampen;
                reasons.push("Volatility outside acceptable range".to_string());
            }
        }

        let components = ComponentScores {
            trend,
            momentum,
            volatility,
            volume,
            sentiment: sentiment_score,
        };

        if !raw.is_finite() {
            warn!(
                symbol,
                %timestamp,
                ?components,
                stage = "score",
                "non-finite score, holding"
            );
            return Some(Signal::hold(symbol, timestamp, "non-finite score"));
        }

        let strength = self.normalize(raw);
        let action = self.config.action_for(strength);
        debug!(symbol, %timestamp, raw, strength, %action, stage = "score", "scored bar");

        Some(Signal {
            symbol: symbol.to_string(),
            timestamp,
            action,
            strength,
            components,
            reasons,
        })
    }
}
