//! Doubles for the integration tests: a scripted text service and a fixed
//! market data feed.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;

use tiltmirror::error::{GatewayError, MarketError};
use tiltmirror::gateway::TextGenerator;
use tiltmirror::market::{Bar, Headline, HistoryWindow, MarketDataProvider};
use tiltmirror::trades::{Side, TradeRecord};

/// Replays queued replies, then fails. Clones share the call log.
#[derive(Clone, Default)]
pub struct Script {
    replies: Arc<Mutex<VecDeque<Result<String, GatewayError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Script {
    pub fn replies(replies: &[&str]) -> Self {
        let script = Self::default();
        script
            .replies
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| Ok(r.to_string())));
        script
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for Script {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Provider("script exhausted".into())))
    }
}

pub struct FixedFeed {
    closes: Vec<f64>,
}

impl FixedFeed {
    /// Hourly closes drifting by well under a tenth of a percent.
    pub fn calm() -> Self {
        Self { closes: vec![100.0, 100.05, 100.1, 100.08, 100.12, 100.15] }
    }

    /// Swings of several percent per bar.
    pub fn stormy() -> Self {
        Self { closes: vec![100.0, 106.0, 97.0, 104.0, 95.0, 103.0] }
    }
}

#[async_trait]
impl MarketDataProvider for FixedFeed {
    async fn history(
        &self,
        _ticker: &str,
        _window: HistoryWindow,
    ) -> Result<Vec<Bar>, MarketError> {
        Ok(self
            .closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                ts: 1_710_000_000 + i as i64 * 3600,
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 5_000.0,
            })
            .collect())
    }

    async fn headlines(&self, _ticker: &str, _max: usize) -> Result<Vec<Headline>, MarketError> {
        Ok(Vec::new())
    }
}

pub fn trades(pnls: &[f64]) -> Vec<TradeRecord> {
    pnls.iter()
        .enumerate()
        .map(|(i, &pnl)| TradeRecord {
            closed_at: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
                + chrono::Duration::days(i as i64),
            ticker: "NVDA".into(),
            side: if i % 2 == 0 { Side::Long } else { Side::Short },
            entry_price: 850.0,
            exit_price: 850.0,
            size: 2.0,
            pnl,
            entry_signal: "Breakout Re-test".into(),
            exit_signal: "Time Stop".into(),
            note: "Followed the plan.".into(),
        })
        .collect()
}
