//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{GatewayError, MarketError};
use crate::gateway::TextGenerator;
use crate::market::{Bar, Headline, HistoryWindow, MarketDataProvider};

/// Replays queued responses, then repeats `fallback` forever.
pub struct ScriptedGenerator {
    queue: Mutex<VecDeque<Result<String, GatewayError>>>,
    fallback: Result<String, GatewayError>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, GatewayError>>) -> Self {
        Self {
            queue: Mutex::new(script.into()),
            fallback: Err(GatewayError::Provider("script exhausted".into())),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: &str) -> Self {
        Self {
            fallback: Ok(text.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn failing(err: GatewayError) -> Self {
        Self {
            fallback: Err(err),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Serves fixed bars and headlines; `None` bars simulate an outage.
pub struct StaticProvider {
    pub bars: Option<Vec<Bar>>,
    pub headlines: Vec<Headline>,
}

impl StaticProvider {
    pub fn with_closes(closes: &[f64], volumes: &[f64]) -> Self {
        let bars = closes
            .iter()
            .zip(volumes.iter())
            .enumerate()
            .map(|(i, (&c, &v))| Bar {
                ts: 1_700_000_000 + i as i64 * 3600,
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume: v,
            })
            .collect();
        Self { bars: Some(bars), headlines: Vec::new() }
    }

    pub fn offline() -> Self {
        Self { bars: None, headlines: Vec::new() }
    }
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    async fn history(
        &self,
        _ticker: &str,
        _window: HistoryWindow,
    ) -> Result<Vec<Bar>, MarketError> {
        self.bars
            .clone()
            .ok_or_else(|| MarketError::DataUnavailable("offline".into()))
    }

    async fn headlines(&self, _ticker: &str, max: usize) -> Result<Vec<Headline>, MarketError> {
        if self.bars.is_none() {
            return Err(MarketError::DataUnavailable("offline".into()));
        }
        Ok(self.headlines.iter().take(max).cloned().collect())
    }
}
