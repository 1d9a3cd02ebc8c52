//! Tilt scoring: fixed flag weights, escalated to a narrative call when the
//! score crosses the escalation threshold.

use serde::Serialize;

use crate::config::TiltConfig;
use crate::error::TiltError;
use crate::gateway::{Gateway, TextGenerator};
use crate::interaction::InteractionStats;
use crate::logging::log_tilt;
use crate::market::{MarketState, Regime};
use crate::profile::TraderProfile;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TiltAssessment {
    /// 0..=9 with the default weights
    pub score: u8,
    pub narrative: Option<String>,
    pub requires_intervention: bool,
}

pub struct TiltEngine {
    cfg: TiltConfig,
}

impl TiltEngine {
    pub fn new(cfg: TiltConfig) -> Self {
        Self { cfg }
    }

    pub fn base_score(
        &self,
        market: &MarketState,
        stats: &InteractionStats,
        profile: &TraderProfile,
    ) -> u8 {
        let mut score = 0u8;
        if market.regime == Regime::HighVol {
            score = score.saturating_add(self.cfg.high_vol_weight);
        }
        if stats.erratic {
            score = score.saturating_add(self.cfg.erratic_weight);
        }
        if profile.revenge_signal_count > self.cfg.revenge_history_min {
            score = score.saturating_add(self.cfg.revenge_weight);
        }
        score
    }

    /// Scores below the escalation threshold never touch the gateway. Above
    /// it, a failed narrative call fails the whole assessment.
    pub async fn score<G: TextGenerator>(
        &self,
        gateway: &mut Gateway<G>,
        market: &MarketState,
        stats: &InteractionStats,
        profile: &TraderProfile,
    ) -> Result<TiltAssessment, TiltError> {
        let score = self.base_score(market, stats, profile);
        if score < self.cfg.escalation_threshold {
            log_tilt(score, false, false);
            return Ok(TiltAssessment {
                score,
                narrative: None,
                requires_intervention: false,
            });
        }

        let narrative = gateway.invoke(&tilt_prompt(market, stats, profile)).await?;
        let requires_intervention = score >= self.cfg.intervention_threshold;
        log_tilt(score, true, requires_intervention);
        Ok(TiltAssessment {
            score,
            narrative: Some(narrative),
            requires_intervention,
        })
    }
}

pub fn tilt_prompt(
    market: &MarketState,
    stats: &InteractionStats,
    profile: &TraderProfile,
) -> String {
    format!(
        "You are a trading psychology expert. Analyze this situation:\n\n\
         MARKET: {} regime, volatility {:.4}\n\
         USER BEHAVIOR: {} actions in window, {} cancels, {} places\n\
         TRADER HISTORY: {} revenge patterns detected (revenge_signal_count)\n\n\
         Is the trader in TILT? Respond in JSON:\n\
         {{\n\
         \"tilt_detected\": true/false,\n\
         \"severity\": \"LOW|MEDIUM|HIGH|CRITICAL\",\n\
         \"reasoning\": \"brief explanation\",\n\
         \"trigger\": \"what caused it\"\n}}",
        market.regime.as_str(),
        market.volatility,
        stats.total_actions,
        stats.cancel_count,
        stats.place_count,
        profile.revenge_signal_count,
    )
}
