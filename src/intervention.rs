//! Intervention arbitration: score to severity, severity to message, message
//! to UI directive. Successful interventions are kept in an append-only
//! history for the lifetime of the arbiter.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ArbiterConfig;
use crate::gateway::{Gateway, TextGenerator};
use crate::logging::{log, log_intervention, obj, v_str, Domain, Level};
use crate::market::MarketState;
use crate::profile::TraderProfile;
use crate::tilt::TiltAssessment;

const DEFAULT_LOCK_REF: &str = "Previous blowup pattern detected";

/// Closed set of escalation tiers, ordered by urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    None,
    SoftNudge,
    Critical,
    HardLock,
}

impl Severity {
    pub fn from_score(score: u8) -> Self {
        if score >= 9 {
            Severity::HardLock
        } else if score >= 7 {
            Severity::Critical
        } else if score >= 5 {
            Severity::SoftNudge
        } else {
            Severity::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::SoftNudge => "SOFT_NUDGE",
            Severity::Critical => "CRITICAL",
            Severity::HardLock => "HARD_LOCK",
        }
    }

    pub fn requires_ui_lock(&self) -> bool {
        matches!(self, Severity::HardLock | Severity::Critical)
    }
}

/// A severity, or `Error` when message generation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionKind {
    None,
    SoftNudge,
    Critical,
    HardLock,
    Error,
}

impl From<Severity> for InterventionKind {
    fn from(s: Severity) -> Self {
        match s {
            Severity::None => InterventionKind::None,
            Severity::SoftNudge => InterventionKind::SoftNudge,
            Severity::Critical => InterventionKind::Critical,
            Severity::HardLock => InterventionKind::HardLock,
        }
    }
}

impl InterventionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionKind::None => "NONE",
            InterventionKind::SoftNudge => "SOFT_NUDGE",
            InterventionKind::Critical => "CRITICAL",
            InterventionKind::HardLock => "HARD_LOCK",
            InterventionKind::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiAction {
    LockTrading,
    ShowWarning,
    ShowNotification,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiDirective {
    pub title: String,
    pub action: UiAction,
    pub duration_minutes: Option<u32>,
    pub color: Option<String>,
    pub dismissible: bool,
    pub message: String,
    pub historical_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intervention {
    pub kind: InterventionKind,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub requires_ui_lock: bool,
    pub ui: Option<UiDirective>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterventionStats {
    pub total: usize,
    pub soft_nudges: usize,
    pub critical_warnings: usize,
    pub hard_locks: usize,
    pub last_intervention: Option<DateTime<Utc>>,
}

pub struct Arbiter {
    cfg: ArbiterConfig,
    history: Vec<Intervention>,
}

impl Arbiter {
    pub fn new(cfg: ArbiterConfig) -> Self {
        Self {
            cfg,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Intervention] {
        &self.history
    }

    /// NONE never calls the gateway. A failed call yields an `Error`
    /// intervention that is not recorded in the history.
    pub async fn generate<G: TextGenerator>(
        &mut self,
        gateway: &mut Gateway<G>,
        assessment: &TiltAssessment,
        profile: &TraderProfile,
        market: &MarketState,
    ) -> Intervention {
        let severity = Severity::from_score(assessment.score);
        if severity == Severity::None {
            log_intervention(severity.as_str(), assessment.score, false);
            return Intervention {
                kind: InterventionKind::None,
                message: None,
                timestamp: Utc::now(),
                requires_ui_lock: false,
                ui: None,
            };
        }

        let prompt = intervention_prompt(assessment, profile, market, severity);
        match gateway.invoke(&prompt).await {
            Ok(message) => {
                let intervention = Intervention {
                    kind: severity.into(),
                    message: Some(message),
                    timestamp: Utc::now(),
                    requires_ui_lock: severity.requires_ui_lock(),
                    ui: None,
                };
                let locked = intervention.requires_ui_lock;
                log_intervention(severity.as_str(), assessment.score, locked);
                self.history.push(intervention.clone());
                intervention
            }
            Err(err) => {
                log(
                    Level::Error,
                    Domain::Intervention,
                    "intervention_failed",
                    obj(&[
                        ("severity", v_str(severity.as_str())),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
                Intervention {
                    kind: InterventionKind::Error,
                    message: Some(format!("Failed to generate intervention: {}", err)),
                    timestamp: Utc::now(),
                    requires_ui_lock: false,
                    ui: None,
                }
            }
        }
    }

    pub fn render_overlay(
        &self,
        intervention: &Intervention,
        historical_ref: Option<&str>,
    ) -> UiDirective {
        let message = intervention.message.clone().unwrap_or_default();
        let historical_ref = historical_ref.map(str::to_string);
        match intervention.kind {
            InterventionKind::HardLock => UiDirective {
                title: "🚨 RECOVERY MODE DETECTED".to_string(),
                action: UiAction::LockTrading,
                duration_minutes: Some(self.cfg.hard_lock_minutes),
                color: Some("red".to_string()),
                dismissible: false,
                message,
                historical_ref: historical_ref.or_else(|| Some(DEFAULT_LOCK_REF.to_string())),
            },
            InterventionKind::Critical => UiDirective {
                title: "⚠️ TILT WARNING".to_string(),
                action: UiAction::ShowWarning,
                duration_minutes: None,
                color: Some("orange".to_string()),
                dismissible: false,
                message,
                historical_ref,
            },
            InterventionKind::SoftNudge => UiDirective {
                title: "💡 Behavioral Notice".to_string(),
                action: UiAction::ShowNotification,
                duration_minutes: None,
                color: Some("yellow".to_string()),
                dismissible: true,
                message,
                historical_ref,
            },
            InterventionKind::Error => UiDirective {
                title: "Intervention unavailable".to_string(),
                action: UiAction::ShowNotification,
                duration_minutes: None,
                color: Some("gray".to_string()),
                dismissible: true,
                message,
                historical_ref: None,
            },
            InterventionKind::None => UiDirective {
                title: "System OK".to_string(),
                action: UiAction::None,
                duration_minutes: None,
                color: None,
                dismissible: true,
                message: "No intervention needed".to_string(),
                historical_ref: None,
            },
        }
    }

    pub fn stats(&self) -> InterventionStats {
        let count = |kind| self.history.iter().filter(|i| i.kind == kind).count();
        InterventionStats {
            total: self.history.len(),
            soft_nudges: count(InterventionKind::SoftNudge),
            critical_warnings: count(InterventionKind::Critical),
            hard_locks: count(InterventionKind::HardLock),
            last_intervention: self.history.last().map(|i| i.timestamp),
        }
    }
}

pub fn intervention_prompt(
    assessment: &TiltAssessment,
    profile: &TraderProfile,
    market: &MarketState,
    severity: Severity,
) -> String {
    format!(
        "You are a trading psychology coach. Generate an intervention message.\n\n\
         SITUATION:\n\
         - Tilt Score: {}/10\n\
         - Market Regime: {} (volatility {:.4})\n\
         - Trader Profile: Win Rate {}%, {} revenge patterns\n\
         - Narrative: {}\n\n\
         INTERVENTION TYPE: {}\n\n\
         Generate a message that:\n\
         1. Acknowledges the emotional state\n\
         2. References their specific pattern\n\
         3. Provides actionable guidance\n\
         4. Uses firm but supportive tone\n\n\
         Keep it under 100 words. Be direct.",
        assessment.score,
        market.regime.as_str(),
        market.volatility,
        profile.win_rate,
        profile.revenge_signal_count,
        assessment.narrative.as_deref().unwrap_or("N/A"),
        severity.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::error::GatewayError;
    use crate::market::Regime;
    use crate::profile::BiasLabel;
    use crate::testing::ScriptedGenerator;

    fn market() -> MarketState {
        MarketState {
            ticker: "NVDA".into(),
            current_price: 880.0,
            volatility: 0.04,
            regime: Regime::HighVol,
            momentum_pct: -4.0,
            volume_spike: true,
            captured_at: Utc::now(),
            is_synthetic: false,
        }
    }

    fn profile() -> TraderProfile {
        TraderProfile {
            total_trades: 12,
            win_rate: 41.7,
            avg_win: 120.0,
            avg_loss: -180.0,
            revenge_signal_count: 3,
            fomo_count: 1,
            risk_reward_ratio: 0.67,
            dominant_bias: BiasLabel::LossAversionRevenge,
        }
    }

    fn assessment(score: u8) -> TiltAssessment {
        TiltAssessment {
            score,
            narrative: Some("tilted".into()),
            requires_intervention: score >= 7,
        }
    }

    fn gateway(gen: ScriptedGenerator) -> Gateway<ScriptedGenerator> {
        Gateway::new(gen, &GatewayConfig::default())
    }

    #[test]
    fn test_severity_breakpoints() {
        let expected = [
            (0, Severity::None),
            (4, Severity::None),
            (5, Severity::SoftNudge),
            (6, Severity::SoftNudge),
            (7, Severity::Critical),
            (8, Severity::Critical),
            (9, Severity::HardLock),
            (10, Severity::HardLock),
            (u8::MAX, Severity::HardLock),
        ];
        for (score, severity) in expected {
            assert_eq!(Severity::from_score(score), severity, "score {}", score);
        }
    }

    #[test]
    fn test_severity_monotonic() {
        for s in 0..u8::MAX {
            assert!(Severity::from_score(s) <= Severity::from_score(s + 1));
        }
    }

    #[tokio::test]
    async fn test_none_skips_gateway() {
        let mut arbiter = Arbiter::new(ArbiterConfig::default());
        let mut gw = gateway(ScriptedGenerator::always("unused"));
        let out = arbiter.generate(&mut gw, &assessment(4), &profile(), &market()).await;
        assert_eq!(out.kind, InterventionKind::None);
        assert_eq!(out.message, None);
        assert_eq!(gw.generator().calls(), 0);
        assert_eq!(arbiter.stats().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_lock_recorded() {
        let mut arbiter = Arbiter::new(ArbiterConfig::default());
        let mut gw = gateway(ScriptedGenerator::always("Step away for five minutes."));
        let out = arbiter.generate(&mut gw, &assessment(9), &profile(), &market()).await;
        assert_eq!(out.kind, InterventionKind::HardLock);
        assert!(out.requires_ui_lock);
        assert_eq!(arbiter.history().len(), 1);

        let prompt = &gw.generator().prompts()[0];
        assert!(prompt.contains("Tilt Score: 9/10"));
        assert!(prompt.contains("Win Rate 41.7%"));
        assert!(prompt.contains("INTERVENTION TYPE: HARD_LOCK"));

        let stats = arbiter.stats();
        assert_eq!(stats.hard_locks, 1);
        assert_eq!(stats.last_intervention, Some(out.timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_nudge_does_not_lock() {
        let mut arbiter = Arbiter::new(ArbiterConfig::default());
        let mut gw = gateway(ScriptedGenerator::always("breathe"));
        let out = arbiter.generate(&mut gw, &assessment(5), &profile(), &market()).await;
        assert_eq!(out.kind, InterventionKind::SoftNudge);
        assert!(!out.requires_ui_lock);
        assert_eq!(arbiter.stats().soft_nudges, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_yields_error_kind_unrecorded() {
        let mut arbiter = Arbiter::new(ArbiterConfig::default());
        let mut gw = gateway(ScriptedGenerator::failing(GatewayError::Throttled("quota".into())));
        let out = arbiter.generate(&mut gw, &assessment(7), &profile(), &market()).await;
        assert_eq!(out.kind, InterventionKind::Error);
        assert!(out.message.unwrap().contains("quota"));
        assert!(arbiter.history().is_empty());
        assert_eq!(gw.generator().calls(), 3);
    }

    #[test]
    fn test_overlay_mapping() {
        let arbiter = Arbiter::new(ArbiterConfig::default());
        let mk = |kind| Intervention {
            kind,
            message: Some("m".into()),
            timestamp: Utc::now(),
            requires_ui_lock: false,
            ui: None,
        };

        let lock = arbiter.render_overlay(&mk(InterventionKind::HardLock), None);
        assert_eq!(lock.action, UiAction::LockTrading);
        assert_eq!(lock.duration_minutes, Some(5));
        assert!(!lock.dismissible);
        assert_eq!(lock.historical_ref.as_deref(), Some(DEFAULT_LOCK_REF));

        let warn = arbiter.render_overlay(&mk(InterventionKind::Critical), Some("ref"));
        assert_eq!(warn.action, UiAction::ShowWarning);
        assert!(!warn.dismissible);
        assert_eq!(warn.historical_ref.as_deref(), Some("ref"));

        let nudge = arbiter.render_overlay(&mk(InterventionKind::SoftNudge), None);
        assert_eq!(nudge.action, UiAction::ShowNotification);
        assert!(nudge.dismissible);

        let ok = arbiter.render_overlay(&mk(InterventionKind::None), Some("ignored"));
        assert_eq!(ok.action, UiAction::None);
        assert_eq!(ok.title, "System OK");
        assert_eq!(ok.historical_ref, None);
    }

    #[test]
    fn test_error_overlay_is_distinct_from_all_clear() {
        let arbiter = Arbiter::new(ArbiterConfig::default());
        let failed = Intervention {
            kind: InterventionKind::Error,
            message: Some("Failed to generate intervention: provider down".into()),
            timestamp: Utc::now(),
            requires_ui_lock: false,
            ui: None,
        };
        let ui = arbiter.render_overlay(&failed, Some("ignored"));
        assert_eq!(ui.title, "Intervention unavailable");
        assert_eq!(ui.action, UiAction::ShowNotification);
        assert_eq!(ui.message, "Failed to generate intervention: provider down");
        assert_ne!(ui.message, "No intervention needed");
        assert_eq!(ui.historical_ref, None);

        let all_clear = Intervention {
            kind: InterventionKind::None,
            message: None,
            ..failed
        };
        assert_ne!(ui, arbiter.render_overlay(&all_clear, None));
        let clear = arbiter.render_overlay(&all_clear, None);
        assert_ne!(ui, clear);
    }
}
