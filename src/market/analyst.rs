//! Market narrative: regime commentary, technicals and "why it moved".
//!
//! Narrative generation degrades to static text built from the numbers
//! whenever the text service fails, so callers always get something to show.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::MarketConfig;
use crate::error::MarketError;
use crate::gateway::{Gateway, TextGenerator};
use crate::logging::{log_fallback, Domain};
use crate::market::indicators::{mean, pct_change, Rsi, Sma};
use crate::market::{Bar, Headline, HistoryWindow, MarketDataProvider, MarketState};

const MIN_DAILY_BARS: usize = 20;
const MAX_HEADLINES: usize = 5;
const MAX_BRIEFING_TICKERS: usize = 5;
const NO_BRIEFING_DATA: &str = "Unable to generate briefing. No valid data available.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeNarrative {
    pub text: String,
    /// Static text stood in for the service
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RsiSignal {
    Overbought,
    Oversold,
    Neutral,
}

impl RsiSignal {
    pub fn from_rsi(rsi: f64) -> Self {
        if rsi > 70.0 {
            RsiSignal::Overbought
        } else if rsi < 30.0 {
            RsiSignal::Oversold
        } else {
            RsiSignal::Neutral
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeSignal {
    High,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Technicals {
    pub current_price: f64,
    pub rsi: f64,
    pub rsi_signal: RsiSignal,
    pub sma_20: f64,
    pub sma_50: f64,
    pub trend: Trend,
    pub volume_signal: VolumeSignal,
    pub support: f64,
    pub resistance: f64,
    pub price_change_1d: f64,
    pub price_change_5d: f64,
    pub computed_at: DateTime<Utc>,
    pub is_synthetic: bool,
}

impl Technicals {
    /// RSI(14), SMA20/50 trend, volume and 20-bar support/resistance.
    pub fn from_daily_bars(bars: &[Bar], volume_spike_mult: f64) -> Result<Self, MarketError> {
        if bars.len() < MIN_DAILY_BARS {
            return Err(MarketError::DataUnavailable(format!(
                "need {} daily bars for technicals, got {}",
                MIN_DAILY_BARS,
                bars.len()
            )));
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let n = closes.len();
        let last = closes[n - 1];

        let mut rsi = Rsi::new(14);
        let mut sma_20 = Sma::new(20);
        let mut sma_50 = Sma::new(50);
        for &c in &closes {
            rsi.update(c);
            sma_20.update(c);
            sma_50.update(c);
        }
        let sma_20 = sma_20.get();
        let sma_50 = if sma_50.is_ready() { sma_50.get() } else { sma_20 };

        let trend = if last > sma_20 && sma_20 > sma_50 {
            Trend::Bullish
        } else if last < sma_20 && sma_20 < sma_50 {
            Trend::Bearish
        } else {
            Trend::Neutral
        };

        let volume_signal = if volumes[n - 1] > mean(&volumes) * volume_spike_mult {
            VolumeSignal::High
        } else {
            VolumeSignal::Normal
        };

        let recent = &bars[n - MIN_DAILY_BARS..];
        let resistance = recent.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let support = recent.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        Ok(Self {
            current_price: last,
            rsi: rsi.get(),
            rsi_signal: RsiSignal::from_rsi(rsi.get()),
            sma_20,
            sma_50,
            trend,
            volume_signal,
            support,
            resistance,
            price_change_1d: pct_change(closes[n - 2], last),
            price_change_5d: if n >= 5 { pct_change(closes[n - 5], last) } else { 0.0 },
            computed_at: Utc::now(),
            is_synthetic: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketExplanation {
    pub ticker: String,
    pub explanation: String,
    pub technicals: Technicals,
    pub news: Vec<Headline>,
    pub generated_at: DateTime<Utc>,
    /// Explanation is static text, not service output
    pub fallback_mode: bool,
}

/// Sentiment read for one ticker. The service output is kept raw.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "sentiment", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentimentReport {
    /// No technicals, so the service was not asked
    Unknown,
    Analyzed {
        raw_response: String,
        rsi: f64,
        trend: Trend,
        price_change_1d: f64,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Briefing {
    pub text: String,
    /// Tickers that had usable technicals, in request order
    pub covered: Vec<String>,
    pub fallback: bool,
}

pub struct MarketAnalyst {
    volume_spike_mult: f64,
    rng: StdRng,
}

impl MarketAnalyst {
    pub fn new(cfg: &MarketConfig) -> Self {
        let rng = match cfg.synthetic_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            volume_spike_mult: cfg.volume_spike_mult,
            rng,
        }
    }

    /// One gateway call describing the regime; static text on failure.
    pub async fn analyze_regime<G: TextGenerator>(
        &self,
        gateway: &mut Gateway<G>,
        market: &MarketState,
    ) -> RegimeNarrative {
        match gateway.invoke(&regime_prompt(market)).await {
            Ok(text) => RegimeNarrative { text, fallback: false },
            Err(err) => {
                log_fallback(Domain::Market, "regime_narrative", &err.to_string());
                RegimeNarrative {
                    text: static_regime_text(market),
                    fallback: true,
                }
            }
        }
    }

    pub async fn technicals<P: MarketDataProvider>(
        &self,
        provider: &P,
        ticker: &str,
    ) -> Result<Technicals, MarketError> {
        let bars = provider.history(ticker, HistoryWindow::Daily).await?;
        Technicals::from_daily_bars(&bars, self.volume_spike_mult)
    }

    /// Price action, technicals and headlines folded into a short explanation.
    pub async fn explain_move<G: TextGenerator, P: MarketDataProvider>(
        &mut self,
        gateway: &mut Gateway<G>,
        provider: &P,
        ticker: &str,
    ) -> MarketExplanation {
        let (technicals, news) = match self.technicals(provider, ticker).await {
            Ok(t) => {
                let news = provider.headlines(ticker, MAX_HEADLINES).await.unwrap_or_default();
                (t, news)
            }
            Err(err) => {
                log_fallback(Domain::Market, "technicals", &err.to_string());
                (self.synthetic_technicals(ticker), demo_headlines(ticker))
            }
        };

        let (explanation, fallback_mode) =
            match gateway.invoke(&explain_prompt(ticker, &technicals, &news)).await {
                Ok(text) => (text, false),
                Err(err) => {
                    log_fallback(Domain::Market, "explanation", &err.to_string());
                    (static_explanation(ticker, &technicals, &news), true)
                }
            };

        MarketExplanation {
            ticker: ticker.to_string(),
            explanation,
            technicals,
            news,
            generated_at: Utc::now(),
            fallback_mode,
        }
    }

    /// One gateway call over technicals and headlines. Returns `Unknown`
    /// without calling the service when technicals are unavailable.
    pub async fn sentiment<G: TextGenerator, P: MarketDataProvider>(
        &self,
        gateway: &mut Gateway<G>,
        provider: &P,
        ticker: &str,
    ) -> SentimentReport {
        let technicals = match self.technicals(provider, ticker).await {
            Ok(t) => t,
            Err(err) => {
                log_fallback(Domain::Market, "sentiment", &err.to_string());
                return SentimentReport::Unknown;
            }
        };
        let news = provider.headlines(ticker, MAX_HEADLINES).await.unwrap_or_default();

        match gateway.invoke(&sentiment_prompt(ticker, &technicals, &news)).await {
            Ok(raw_response) => SentimentReport::Analyzed {
                raw_response,
                rsi: technicals.rsi,
                trend: technicals.trend,
                price_change_1d: technicals.price_change_1d,
            },
            Err(err) => SentimentReport::Failed {
                error: err.to_string(),
            },
        }
    }

    /// Morning briefing over the first five tickers. Tickers without
    /// technicals are skipped; with none left the service is not called.
    pub async fn briefing<G: TextGenerator, P: MarketDataProvider>(
        &self,
        gateway: &mut Gateway<G>,
        provider: &P,
        tickers: &[String],
    ) -> Briefing {
        let mut rows = Vec::new();
        for ticker in tickers.iter().take(MAX_BRIEFING_TICKERS) {
            match self.technicals(provider, ticker).await {
                Ok(t) => rows.push((ticker.clone(), t)),
                Err(err) => log_fallback(Domain::Market, "briefing_ticker", &err.to_string()),
            }
        }
        if rows.is_empty() {
            return Briefing {
                text: NO_BRIEFING_DATA.to_string(),
                covered: Vec::new(),
                fallback: true,
            };
        }

        let summary = rows
            .iter()
            .map(|(ticker, t)| briefing_line(ticker, t))
            .collect::<Vec<_>>()
            .join("\n");
        let covered = rows.into_iter().map(|(ticker, _)| ticker).collect();

        match gateway.invoke(&briefing_prompt(&summary)).await {
            Ok(text) => Briefing { text, covered, fallback: false },
            Err(err) => {
                log_fallback(Domain::Market, "briefing", &err.to_string());
                Briefing {
                    text: format!("Market snapshot (narrative unavailable):\n{}", summary),
                    covered,
                    fallback: true,
                }
            }
        }
    }

    fn synthetic_technicals(&mut self, ticker: &str) -> Technicals {
        let base_price = match ticker {
            "AAPL" => 185.50,
            "TSLA" => 248.30,
            "NVDA" => 875.20,
            "GOOGL" => 175.80,
            "AMZN" => 185.60,
            "META" => 520.40,
            "SPY" => 520.15,
            "BTC-USD" => 97_500.0,
            _ => 100.0,
        };
        let change = self.rng.gen_range(-3.5..3.5);
        let price = base_price * (1.0 + change / 100.0);
        let rsi = self.rng.gen_range(35.0..65.0);
        let trend = if change > 0.5 {
            Trend::Bullish
        } else if change < -0.5 {
            Trend::Bearish
        } else {
            Trend::Neutral
        };
        Technicals {
            current_price: price,
            rsi,
            rsi_signal: RsiSignal::from_rsi(rsi),
            sma_20: price * 0.98,
            sma_50: price * 0.95,
            trend,
            volume_signal: if self.rng.gen_bool(0.5) {
                VolumeSignal::High
            } else {
                VolumeSignal::Normal
            },
            support: price * 0.95,
            resistance: price * 1.05,
            price_change_1d: change,
            price_change_5d: change * 1.5,
            computed_at: Utc::now(),
            is_synthetic: true,
        }
    }
}

pub fn regime_prompt(market: &MarketState) -> String {
    format!(
        "You are a market regime analyst. Analyze this market state:\n\n\
         Ticker: {}\n\
         Volatility: {:.4}\n\
         Regime: {}\n\
         Momentum: {:.2}%\n\
         Volume Spike: {}\n\n\
         Respond in JSON format:\n\
         {{\n\
         \"regime_type\": \"LOW_VOL|HIGH_VOL|CRISIS\",\n\
         \"risk_level\": \"LOW|MEDIUM|HIGH|EXTREME\",\n\
         \"trader_advice\": \"brief advice\"\n}}",
        market.ticker,
        market.volatility,
        market.regime.as_str(),
        market.momentum_pct,
        market.volume_spike
    )
}

fn static_regime_text(market: &MarketState) -> String {
    let spike = if market.volume_spike { ", with a volume spike" } else { "" };
    format!(
        "{} is in a {} regime: volatility {:.4}, {:+.2}% over the window{}.",
        market.ticker,
        market.regime.as_str(),
        market.volatility,
        market.momentum_pct,
        spike
    )
}

fn explain_prompt(ticker: &str, t: &Technicals, news: &[Headline]) -> String {
    let news_summary = if news.is_empty() {
        "No recent news available.".to_string()
    } else {
        news.iter()
            .map(|h| format!("- {} ({})", h.title, h.publisher))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You are a professional market analyst. Explain why {ticker} moved today.\n\n\
         PRICE ACTION:\n\
         - Current Price: ${:.2}\n\
         - 1-Day Change: {:.2}%\n\
         - 5-Day Change: {:.2}%\n\n\
         TECHNICAL INDICATORS:\n\
         - RSI (14): {:.2} ({:?})\n\
         - Trend: {:?} (Price vs SMA20 vs SMA50)\n\
         - Volume: {:?}\n\
         - Support: ${:.2} | Resistance: ${:.2}\n\n\
         RECENT NEWS:\n{news_summary}\n\n\
         Provide:\n\
         1. A concise 2-3 sentence explanation of WHY the price moved\n\
         2. Key drivers (news, technicals, or sentiment)\n\
         3. What traders should watch next\n\n\
         Keep it professional but accessible. No predictions or buy/sell signals.",
        t.current_price,
        t.price_change_1d,
        t.price_change_5d,
        t.rsi,
        t.rsi_signal,
        t.trend,
        t.volume_signal,
        t.support,
        t.resistance,
    )
}

fn sentiment_prompt(ticker: &str, t: &Technicals, news: &[Headline]) -> String {
    let headlines = news
        .iter()
        .take(MAX_HEADLINES)
        .map(|h| format!("- {}", h.title))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Analyze the sentiment for {ticker} based on:\n\n\
         TECHNICALS:\n\
         - RSI: {:.2} ({:?})\n\
         - Trend: {:?}\n\
         - 1-Day Change: {:.2}%\n\n\
         NEWS HEADLINES:\n{headlines}\n\n\
         Respond in JSON format:\n\
         {{\n\
         \"sentiment\": \"BULLISH|BEARISH|NEUTRAL\",\n\
         \"confidence\": 0-100,\n\
         \"key_factors\": [\"factor1\", \"factor2\"],\n\
         \"risk_level\": \"LOW|MEDIUM|HIGH\"\n}}",
        t.rsi, t.rsi_signal, t.trend, t.price_change_1d,
    )
}

fn briefing_line(ticker: &str, t: &Technicals) -> String {
    format!(
        "- {}: ${:.2} ({:+.2}%) | {:?} | RSI: {:.2}",
        ticker, t.current_price, t.price_change_1d, t.trend, t.rsi
    )
}

fn briefing_prompt(summary: &str) -> String {
    format!(
        "You are a professional market analyst. Generate a morning market briefing.\n\n\
         TODAY'S DATA:\n{summary}\n\n\
         Create a 3-paragraph briefing that:\n\
         1. Opens with overall market tone\n\
         2. Highlights the most significant movers and why\n\
         3. Ends with what to watch today\n\n\
         Style: Professional, concise, no predictions. Suitable for LinkedIn or newsletter."
    )
}

/// Explanation assembled from the numbers alone.
pub fn static_explanation(ticker: &str, t: &Technicals, news: &[Headline]) -> String {
    let direction = if t.price_change_1d > 0.0 {
        "up"
    } else if t.price_change_1d < 0.0 {
        "down"
    } else {
        "flat"
    };

    let mut parts = vec![format!(
        "{} moved {} {:.2}% today, trading at ${:.2}.",
        ticker,
        direction,
        t.price_change_1d.abs(),
        t.current_price
    )];

    parts.push(
        match t.trend {
            Trend::Bullish => {
                "The stock is in a bullish trend, trading above both SMA20 and SMA50."
            }
            Trend::Bearish => {
                "The stock is in a bearish trend, trading below both SMA20 and SMA50."
            }
            Trend::Neutral => {
                "The stock is showing mixed signals between short and long-term moving averages."
            }
        }
        .to_string(),
    );

    match t.rsi_signal {
        RsiSignal::Overbought => parts.push(format!(
            "RSI at {:.1} indicates overbought conditions, potential pullback ahead.",
            t.rsi
        )),
        RsiSignal::Oversold => parts.push(format!(
            "RSI at {:.1} indicates oversold conditions, potential bounce possible.",
            t.rsi
        )),
        RsiSignal::Neutral => {}
    }

    if t.volume_signal == VolumeSignal::High {
        parts.push("Elevated volume suggests strong conviction behind the move.".to_string());
    }

    if let Some(top) = news.first().filter(|h| !h.title.is_empty()) {
        parts.push(format!("Recent headline: \"{}\"", top.title));
    }

    parts.push(format!(
        "Key levels to watch: Support at ${:.2}, Resistance at ${:.2}.",
        t.support, t.resistance
    ));
    parts.join(" ")
}

fn demo_headlines(ticker: &str) -> Vec<Headline> {
    let item = |title: String, publisher: &str| Headline {
        title,
        publisher: publisher.to_string(),
        link: "#".to_string(),
        published: None,
    };
    vec![
        item(format!("{} shows mixed signals in volatile market", ticker), "MarketWatch"),
        item(format!("Analysts update outlook for {}", ticker), "Seeking Alpha"),
    ]
}
