//! Runtime configuration, read from the environment.
//!
//! Every section has a `Default` carrying the reference thresholds, and a
//! `from_env` that overrides individual fields when the variable parses.

use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Minimum spacing between a successful call and the next uncached call
    pub min_spacing: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each backoff delay
    pub jitter: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_secs(2),
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            jitter: Duration::from_secs(1),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_spacing: Duration::from_millis(env_or(
                "GATEWAY_MIN_SPACING_MS",
                d.min_spacing.as_millis() as u64,
            )),
            max_attempts: env_or("GATEWAY_MAX_ATTEMPTS", d.max_attempts).max(1),
            base_delay: Duration::from_millis(env_or(
                "GATEWAY_BASE_DELAY_MS",
                d.base_delay.as_millis() as u64,
            )),
            jitter: Duration::from_millis(env_or("GATEWAY_JITTER_MS", d.jitter.as_millis() as u64)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            temperature: 0.3,
            timeout: Duration::from_secs(30),
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("GEMINI_MODEL").unwrap_or(d.model),
            base_url: std::env::var("GEMINI_BASE").unwrap_or(d.base_url),
            temperature: env_or("LLM_TEMPERATURE", d.temperature),
            timeout: Duration::from_secs(env_or("GEMINI_TIMEOUT_SECS", d.timeout.as_secs())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub base_url: String,
    pub volatility_threshold: f64,
    pub volume_spike_mult: f64,
    /// Seed for the synthetic fallback; entropy when unset
    pub synthetic_seed: Option<u64>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            volatility_threshold: 0.02,
            volume_spike_mult: 1.5,
            synthetic_seed: None,
        }
    }
}

impl MarketConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: std::env::var("MARKET_DATA_BASE").unwrap_or(d.base_url),
            volatility_threshold: env_or("VOL_THRESHOLD", d.volatility_threshold),
            volume_spike_mult: env_or("VOLUME_SPIKE_MULT", d.volume_spike_mult),
            synthetic_seed: std::env::var("SYNTHETIC_SEED").ok().and_then(|v| v.parse().ok()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InteractionConfig {
    pub window_minutes: u32,
    pub action_capacity: usize,
    pub speed_capacity: usize,
    pub erratic_cancels: usize,
    pub erratic_places: usize,
    pub erratic_speed: f64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            action_capacity: 100,
            speed_capacity: 50,
            erratic_cancels: 3,
            erratic_places: 5,
            erratic_speed: 500.0,
        }
    }
}

impl InteractionConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            window_minutes: env_or("INTERACTION_WINDOW_MIN", d.window_minutes),
            action_capacity: env_or("MAX_INTERACTION_BUFFER", d.action_capacity).max(1),
            speed_capacity: env_or("MAX_SPEED_BUFFER", d.speed_capacity).max(1),
            erratic_cancels: env_or("ERRATIC_CANCELS", d.erratic_cancels),
            erratic_places: env_or("ERRATIC_PLACES", d.erratic_places),
            erratic_speed: env_or("ERRATIC_SPEED", d.erratic_speed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// A loss larger than this (in P&L units) arms the revenge detector
    pub revenge_loss_threshold: f64,
    pub fomo_keywords: Vec<String>,
    pub min_win_rate: f64,
    pub min_risk_reward: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            revenge_loss_threshold: 100.0,
            fomo_keywords: ["FOMO", "Revenge", "rushed", "panic", "fear"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_win_rate: 40.0,
            min_risk_reward: 1.5,
        }
    }
}

impl ProfileConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let fomo_keywords = std::env::var("FOMO_KEYWORDS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|ks| !ks.is_empty())
            .unwrap_or(d.fomo_keywords);
        Self {
            revenge_loss_threshold: env_or("REVENGE_LOSS_TH", d.revenge_loss_threshold),
            fomo_keywords,
            min_win_rate: env_or("MIN_WIN_RATE", d.min_win_rate),
            min_risk_reward: env_or("MIN_RR", d.min_risk_reward),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TiltConfig {
    pub high_vol_weight: u8,
    pub erratic_weight: u8,
    pub revenge_weight: u8,
    /// Revenge-signal count above which the history flag fires
    pub revenge_history_min: usize,
    pub escalation_threshold: u8,
    pub intervention_threshold: u8,
}

impl Default for TiltConfig {
    fn default() -> Self {
        Self {
            high_vol_weight: 3,
            erratic_weight: 4,
            revenge_weight: 2,
            revenge_history_min: 2,
            escalation_threshold: 5,
            intervention_threshold: 7,
        }
    }
}

impl TiltConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            escalation_threshold: env_or("ESCALATION_TH", d.escalation_threshold),
            intervention_threshold: env_or("INTERVENTION_TH", d.intervention_threshold),
            ..d
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub hard_lock_minutes: u32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self { hard_lock_minutes: 5 }
    }
}

impl ArbiterConfig {
    pub fn from_env() -> Self {
        Self {
            hard_lock_minutes: env_or("HARD_LOCK_MINUTES", Self::default().hard_lock_minutes),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub gemini: GeminiConfig,
    pub market: MarketConfig,
    pub interaction: InteractionConfig,
    pub profile: ProfileConfig,
    pub tilt: TiltConfig,
    pub arbiter: ArbiterConfig,
    /// Ask the text service for a regime narrative during Reason
    pub regime_narrative: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            gemini: GeminiConfig::default(),
            market: MarketConfig::default(),
            interaction: InteractionConfig::default(),
            profile: ProfileConfig::default(),
            tilt: TiltConfig::default(),
            arbiter: ArbiterConfig::default(),
            regime_narrative: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            gateway: GatewayConfig::from_env(),
            gemini: GeminiConfig::from_env(),
            market: MarketConfig::from_env(),
            interaction: InteractionConfig::from_env(),
            profile: ProfileConfig::from_env(),
            tilt: TiltConfig::from_env(),
            arbiter: ArbiterConfig::from_env(),
            regime_narrative: env_flag("REGIME_NARRATIVE", true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_thresholds() {
        let cfg = Config::default();
        assert_eq!(cfg.gateway.max_attempts, 3);
        assert_eq!(cfg.gateway.min_spacing, Duration::from_secs(2));
        assert_eq!(cfg.market.volatility_threshold, 0.02);
        assert_eq!(cfg.interaction.action_capacity, 100);
        assert_eq!(cfg.interaction.speed_capacity, 50);
        assert_eq!(cfg.tilt.escalation_threshold, 5);
        assert_eq!(cfg.arbiter.hard_lock_minutes, 5);
        assert!(cfg.regime_narrative);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("TILTMIRROR_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("TILTMIRROR_TEST_GARBAGE", 7u32), 7);
        std::env::remove_var("TILTMIRROR_TEST_GARBAGE");
    }
}
