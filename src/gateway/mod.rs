//! Resilient call gateway in front of the text-generation service.
//!
//! Every prompt goes through [`Gateway::invoke`], which memoizes by the
//! SHA-256 of the literal prompt, spaces uncached calls apart, and retries
//! throttled attempts with exponential backoff. Only successes are cached.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::{sleep, Duration, Instant};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::logging::{log, obj, v_str, Domain, Level};

pub mod gemini;
pub mod retry;

use retry::{retry_classified, RetryConfig};

/// A stateless text-completion service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        (**self).generate(prompt).await
    }
}

/// Generator used when no service is configured. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullGenerator;

#[async_trait]
impl TextGenerator for NullGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GatewayError> {
        Err(GatewayError::Provider("no text service configured".to_string()))
    }
}

/// Lowercase hex SHA-256 of the prompt bytes.
pub fn fingerprint(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GatewayStats {
    /// Attempts actually sent to the service, retries included
    pub external_calls: u64,
    pub cache_hits: u64,
    pub failures: u64,
    pub cached_prompts: usize,
}

pub struct Gateway<G> {
    generator: G,
    retry: RetryConfig,
    min_spacing: Duration,
    cache: HashMap<String, String>,
    last_success: Option<Instant>,
    stats: GatewayStats,
}

impl<G: TextGenerator> Gateway<G> {
    pub fn new(generator: G, cfg: &GatewayConfig) -> Self {
        Self {
            generator,
            retry: RetryConfig::from(cfg),
            min_spacing: cfg.min_spacing,
            cache: HashMap::new(),
            last_success: None,
            stats: GatewayStats::default(),
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cached_prompts: self.cache.len(),
            ..self.stats
        }
    }

    pub async fn invoke(&mut self, prompt: &str) -> Result<String, GatewayError> {
        let key = fingerprint(prompt);
        if let Some(hit) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            log(
                Level::Debug,
                Domain::Gateway,
                "cache_hit",
                obj(&[("fingerprint", v_str(&key[..12]))]),
            );
            return Ok(hit.clone());
        }

        self.wait_for_spacing().await;

        let generator = &self.generator;
        let mut calls = 0u64;
        let result = retry_classified(
            &self.retry,
            &key[..12],
            || {
                calls += 1;
                generator.generate(prompt)
            },
            GatewayError::is_throttled,
        )
        .await;
        self.stats.external_calls += calls;

        match result {
            Ok(text) => {
                self.last_success = Some(Instant::now());
                self.cache.insert(key, text.clone());
                Ok(text)
            }
            Err(err) => {
                self.stats.failures += 1;
                log(
                    Level::Error,
                    Domain::Gateway,
                    "call_failed",
                    obj(&[
                        ("fingerprint", v_str(&key[..12])),
                        ("attempts", serde_json::json!(calls)),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
                Err(err)
            }
        }
    }

    async fn wait_for_spacing(&self) {
        if let Some(last) = self.last_success {
            let elapsed = last.elapsed();
            if elapsed < self.min_spacing {
                sleep(self.min_spacing - elapsed).await;
            }
        }
    }
}
