//! Market perception: point-in-time snapshot of price, volatility and regime.
//!
//! Capture never fails. When the provider is down or returns too little
//! history, a synthetic snapshot with the same fields is produced and
//! flagged with `is_synthetic`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::MarketConfig;
use crate::error::MarketError;
use crate::logging::{log_fallback, log_market_capture, Domain};

pub mod analyst;
pub mod indicators;
pub mod yahoo;

use indicators::{mean, pct_change, pct_returns, sample_std};

/// One OHLCV observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Unix seconds
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub title: String,
    pub publisher: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
}

/// How much history to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    /// Five days of hourly bars, for the live snapshot
    Intraday,
    /// Three months of daily bars, for technicals
    Daily,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Time-ordered bars, oldest first.
    async fn history(&self, ticker: &str, window: HistoryWindow) -> Result<Vec<Bar>, MarketError>;
    async fn headlines(&self, ticker: &str, max: usize) -> Result<Vec<Headline>, MarketError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    LowVol,
    HighVol,
}

impl Regime {
    pub fn classify(volatility: f64, threshold: f64) -> Self {
        if volatility > threshold {
            Regime::HighVol
        } else {
            Regime::LowVol
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::LowVol => "LOW_VOL",
            Regime::HighVol => "HIGH_VOL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub ticker: String,
    pub current_price: f64,
    /// Sample stdev of period returns over the window
    pub volatility: f64,
    pub regime: Regime,
    /// Percent change first → last close in the window
    pub momentum_pct: f64,
    pub volume_spike: bool,
    pub captured_at: DateTime<Utc>,
    pub is_synthetic: bool,
}

impl MarketState {
    /// Derives a snapshot from bars. `None` with fewer than two bars.
    pub fn from_bars(
        ticker: &str,
        bars: &[Bar],
        cfg: &MarketConfig,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if bars.len() < 2 {
            return None;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let volatility = sample_std(&pct_returns(&closes));
        let first = closes[0];
        let last = closes[closes.len() - 1];
        let last_volume = volumes[volumes.len() - 1];

        Some(Self {
            ticker: ticker.to_string(),
            current_price: last,
            volatility,
            regime: Regime::classify(volatility, cfg.volatility_threshold),
            momentum_pct: pct_change(first, last),
            volume_spike: last_volume > mean(&volumes) * cfg.volume_spike_mult,
            captured_at: now,
            is_synthetic: false,
        })
    }
}

pub struct MarketPerception<P> {
    provider: P,
    cfg: MarketConfig,
    rng: StdRng,
}

impl<P: MarketDataProvider> MarketPerception<P> {
    pub fn new(provider: P, cfg: MarketConfig) -> Self {
        let rng = match cfg.synthetic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { provider, cfg, rng }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn capture(&mut self, ticker: &str) -> MarketState {
        let fetched = self.provider.history(ticker, HistoryWindow::Intraday).await;
        let state = match fetched {
            Ok(bars) => match MarketState::from_bars(ticker, &bars, &self.cfg, Utc::now()) {
                Some(state) => state,
                None => {
                    log_fallback(
                        Domain::Market,
                        "market_state",
                        &format!("only {} observations for {}", bars.len(), ticker),
                    );
                    self.synthetic(ticker)
                }
            },
            Err(err) => {
                log_fallback(Domain::Market, "market_state", &err.to_string());
                self.synthetic(ticker)
            }
        };
        log_market_capture(
            &state.ticker,
            state.current_price,
            state.volatility,
            state.regime.as_str(),
            state.is_synthetic,
        );
        state
    }

    /// Randomized stand-in with the live field set.
    pub fn synthetic(&mut self, ticker: &str) -> MarketState {
        let base_price = 150.0;
        let volatility = self.rng.gen_range(0.01..0.05);
        MarketState {
            ticker: ticker.to_string(),
            current_price: base_price * (1.0 + self.rng.gen_range(-0.05..0.05)),
            volatility,
            regime: Regime::classify(volatility, self.cfg.volatility_threshold),
            momentum_pct: self.rng.gen_range(-5.0..5.0),
            volume_spike: self.rng.gen_bool(0.5),
            captured_at: Utc::now(),
            is_synthetic: true,
        }
    }
}
