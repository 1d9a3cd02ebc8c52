use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::MarketConfig;
use crate::error::MarketError;
use crate::market::{Bar, Headline, HistoryWindow, MarketDataProvider};

/// Yahoo Finance public chart and search endpoints.
pub struct YahooFinance {
    client: Client,
    base: String,
}

// Chart API response types
#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Deserialize, Debug)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug, Default)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
struct SearchEnvelope {
    #[serde(default)]
    news: Vec<NewsItem>,
}

#[derive(Deserialize, Debug)]
struct NewsItem {
    title: Option<String>,
    publisher: Option<String>,
    link: Option<String>,
    #[serde(rename = "providerPublishTime")]
    publish_time: Option<i64>,
}

impl YahooFinance {
    pub fn new(cfg: &MarketConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("Mozilla/5.0 (tiltmirror)")
                .build()
                .unwrap_or_else(|_| Client::new()),
            base: cfg.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn range_params(window: HistoryWindow) -> (&'static str, &'static str) {
        match window {
            HistoryWindow::Intraday => ("5d", "1h"),
            HistoryWindow::Daily => ("3mo", "1d"),
        }
    }
}

fn unavailable<E: std::fmt::Display>(err: E) -> MarketError {
    MarketError::DataUnavailable(err.to_string())
}

/// Zips the column arrays into bars, dropping rows with a missing close.
fn bars_from_chart(envelope: ChartEnvelope) -> Result<Vec<Bar>, MarketError> {
    if let Some(err) = envelope.chart.error {
        return Err(MarketError::DataUnavailable(err.description));
    }
    let result = envelope
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
        .ok_or_else(|| MarketError::DataUnavailable("empty chart result".to_string()))?;
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let at = |col: &Vec<Option<f64>>, i: usize| col.get(i).copied().flatten();
    let bars = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let close = at(&quote.close, i)?;
            Some(Bar {
                ts,
                open: at(&quote.open, i).unwrap_or(close),
                high: at(&quote.high, i).unwrap_or(close),
                low: at(&quote.low, i).unwrap_or(close),
                close,
                volume: at(&quote.volume, i).unwrap_or(0.0),
            })
        })
        .collect();
    Ok(bars)
}

#[async_trait]
impl MarketDataProvider for YahooFinance {
    async fn history(&self, ticker: &str, window: HistoryWindow) -> Result<Vec<Bar>, MarketError> {
        let (range, interval) = Self::range_params(window);
        let url = format!("{}/v8/finance/chart/{}", self.base, ticker);
        let resp = self
            .client
            .get(&url)
            .query(&[("range", range), ("interval", interval)])
            .send()
            .await
            .map_err(unavailable)?;
        if !resp.status().is_success() {
            return Err(MarketError::DataUnavailable(format!("chart HTTP {}", resp.status())));
        }
        let envelope: ChartEnvelope = resp.json().await.map_err(unavailable)?;
        bars_from_chart(envelope)
    }

    async fn headlines(&self, ticker: &str, max: usize) -> Result<Vec<Headline>, MarketError> {
        let url = format!("{}/v1/finance/search", self.base);
        let count = max.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[("q", ticker), ("newsCount", count.as_str()), ("quotesCount", "0")])
            .send()
            .await
            .map_err(unavailable)?;
        if !resp.status().is_success() {
            return Err(MarketError::DataUnavailable(format!("search HTTP {}", resp.status())));
        }
        let envelope: SearchEnvelope = resp.json().await.map_err(unavailable)?;
        Ok(envelope
            .news
            .into_iter()
            .take(max)
            .map(|n| Headline {
                title: n.title.unwrap_or_else(|| "No title".to_string()),
                publisher: n.publisher.unwrap_or_else(|| "Unknown".to_string()),
                link: n.link.unwrap_or_else(|| "#".to_string()),
                published: n.publish_time.and_then(|t| Utc.timestamp_opt(t, 0).single()),
            })
            .collect())
    }
}
