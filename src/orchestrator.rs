//! The cognitive loop: Perceive → Reason → Intervene.
//!
//! `CognitiveLoop` is the session context. It owns every piece of mutable
//! state (prompt cache, interaction buffers, cached profile, intervention
//! history), so separate sessions are separate values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::MirrorError;
use crate::gateway::{Gateway, GatewayStats, TextGenerator};
use crate::intervention::{Arbiter, Intervention, InterventionKind, InterventionStats};
use crate::interaction::{InteractionPerception, InteractionStats, PointerTracker};
use crate::logging::{log, log_cycle_summary, obj, v_str, Domain, Level, PhaseScope};
use crate::market::analyst::{
    Briefing, MarketAnalyst, MarketExplanation, RegimeNarrative, SentimentReport,
};
use crate::market::{MarketDataProvider, MarketPerception, MarketState};
use crate::profile::{ProfileBuilder, TraderProfile};
use crate::tilt::{TiltAssessment, TiltEngine};
use crate::trades::TradeRecord;

/// One discrete trader action to ingest during Perceive.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionInput {
    pub label: String,
    pub metadata: BTreeMap<String, Value>,
}

impl ActionInput {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    Active,
    /// Never produced; kept for consumers that match on it
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Perception {
    pub market: MarketState,
    pub interaction: InteractionStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reasoning {
    /// `None` when regime narratives are disabled
    pub regime_narrative: Option<RegimeNarrative>,
    pub tilt: TiltAssessment,
    pub profile: TraderProfile,
    pub market: MarketState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub perception: Perception,
    pub reasoning: Reasoning,
    pub intervention: Intervention,
    pub status: SystemStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub profile: Option<TraderProfile>,
    pub last_market: Option<MarketState>,
    pub intervention_stats: InterventionStats,
    pub buffered_interaction_count: usize,
    pub gateway: GatewayStats,
}

pub struct CognitiveLoop<G, P> {
    gateway: Gateway<G>,
    market: MarketPerception<P>,
    interaction: InteractionPerception,
    pointer: PointerTracker,
    profiler: ProfileBuilder,
    tilt: TiltEngine,
    arbiter: Arbiter,
    analyst: MarketAnalyst,
    profile: Option<TraderProfile>,
    last_market: Option<MarketState>,
    window_minutes: u32,
    regime_narrative: bool,
    active: bool,
}

impl<G: TextGenerator, P: MarketDataProvider> CognitiveLoop<G, P> {
    pub fn new(generator: G, provider: P, cfg: Config) -> Self {
        Self {
            gateway: Gateway::new(generator, &cfg.gateway),
            analyst: MarketAnalyst::new(&cfg.market),
            market: MarketPerception::new(provider, cfg.market),
            window_minutes: cfg.interaction.window_minutes,
            interaction: InteractionPerception::new(cfg.interaction),
            pointer: PointerTracker::new(),
            profiler: ProfileBuilder::new(cfg.profile),
            tilt: TiltEngine::new(cfg.tilt),
            arbiter: Arbiter::new(cfg.arbiter),
            profile: None,
            last_market: None,
            regime_narrative: cfg.regime_narrative,
            active: true,
        }
    }

    pub fn gateway(&self) -> &Gateway<G> {
        &self.gateway
    }

    pub fn profile(&self) -> Option<&TraderProfile> {
        self.profile.as_ref()
    }

    /// Feeds a raw pointer position from the embedding UI. Consecutive
    /// positions become speed samples for the interaction window.
    pub fn track_pointer(&mut self, x: f64, y: f64) -> Option<f64> {
        self.track_pointer_at(x, y, Utc::now())
    }

    pub fn track_pointer_at(&mut self, x: f64, y: f64, ts: DateTime<Utc>) -> Option<f64> {
        let speed = self.pointer.track(x, y, ts)?;
        self.interaction.record_speed_at(speed, ts);
        Some(speed)
    }

    /// Direct access for pointer-speed feeds and replay.
    pub fn interaction_mut(&mut self) -> &mut InteractionPerception {
        &mut self.interaction
    }

    /// Profiles the history and caches the result.
    pub fn initialize_profile(
        &mut self,
        trades: &[TradeRecord],
    ) -> Result<TraderProfile, MirrorError> {
        let profile = self.profiler.profile(trades)?;
        log(
            Level::Info,
            Domain::Profile,
            "profile_cached",
            obj(&[
                ("bias", v_str(profile.dominant_bias.as_str())),
                ("description", v_str(profile.dominant_bias.description())),
            ]),
        );
        self.profile = Some(profile.clone());
        Ok(profile)
    }

    /// Replaces the cached profile. The loop never does this on its own.
    pub fn reprofile(&mut self, trades: &[TradeRecord]) -> Result<TraderProfile, MirrorError> {
        self.initialize_profile(trades)
    }

    pub async fn perceive(&mut self, ticker: &str, action: Option<ActionInput>) -> Perception {
        let _phase = PhaseScope::new("perceive");
        let market = self.market.capture(ticker).await;
        self.last_market = Some(market.clone());
        if let Some(action) = action {
            self.interaction.record_action(&action.label, action.metadata);
        }
        Perception {
            market,
            interaction: self.interaction.stats(self.window_minutes),
        }
    }

    pub async fn reason(&mut self, perception: &Perception) -> Result<Reasoning, MirrorError> {
        let _phase = PhaseScope::new("reason");
        let profile = self.profile.clone().ok_or(MirrorError::ProfileNotInitialized)?;

        let regime_narrative = if self.regime_narrative {
            Some(self.analyst.analyze_regime(&mut self.gateway, &perception.market).await)
        } else {
            None
        };

        let tilt = self
            .tilt
            .score(&mut self.gateway, &perception.market, &perception.interaction, &profile)
            .await?;

        Ok(Reasoning {
            regime_narrative,
            tilt,
            profile,
            market: perception.market.clone(),
        })
    }

    pub async fn intervene(&mut self, reasoning: &Reasoning) -> Intervention {
        let _phase = PhaseScope::new("intervene");
        let mut intervention = self
            .arbiter
            .generate(&mut self.gateway, &reasoning.tilt, &reasoning.profile, &reasoning.market)
            .await;
        if intervention.kind != InterventionKind::None {
            let bias = reasoning.profile.dominant_bias;
            let historical_ref = format!("Similar to your {} pattern", bias);
            let ui = self.arbiter.render_overlay(&intervention, Some(&historical_ref));
            intervention.ui = Some(ui);
        }
        intervention
    }

    /// One full pass. The profile is built from `trades` only when none is
    /// cached yet.
    pub async fn run_cycle(
        &mut self,
        ticker: &str,
        trades: &[TradeRecord],
        action: Option<ActionInput>,
    ) -> Result<CycleReport, MirrorError> {
        if self.profile.is_none() {
            self.initialize_profile(trades)?;
        }

        let perception = self.perceive(ticker, action).await;
        let reasoning = self.reason(&perception).await?;
        let intervention = self.intervene(&reasoning).await;

        log_cycle_summary(
            ticker,
            perception.market.regime.as_str(),
            reasoning.tilt.score,
            intervention.kind.as_str(),
            perception.market.is_synthetic,
        );

        Ok(CycleReport {
            perception,
            reasoning,
            intervention,
            status: if self.active { SystemStatus::Active } else { SystemStatus::Paused },
        })
    }

    /// Market-move explanation for a ticker, independent of the loop state.
    pub async fn explain(&mut self, ticker: &str) -> MarketExplanation {
        self.analyst
            .explain_move(&mut self.gateway, self.market.provider(), ticker)
            .await
    }

    /// Sentiment read for a ticker, independent of the loop state.
    pub async fn sentiment(&mut self, ticker: &str) -> SentimentReport {
        self.analyst
            .sentiment(&mut self.gateway, self.market.provider(), ticker)
            .await
    }

    pub async fn briefing(&mut self, tickers: &[String]) -> Briefing {
        self.analyst
            .briefing(&mut self.gateway, self.market.provider(), tickers)
            .await
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            profile: self.profile.clone(),
            last_market: self.last_market.clone(),
            intervention_stats: self.arbiter.stats(),
            buffered_interaction_count: self.interaction.buffered_actions(),
            gateway: self.gateway.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GatewayError, TiltError};
    use crate::interaction::CANCEL_ORDER;
    use crate::intervention::UiAction;
    use crate::profile::BiasLabel;
    use crate::testing::{ScriptedGenerator, StaticProvider};
    use crate::trades::Side;
    use chrono::NaiveDate;

    fn trades(pnls: &[f64]) -> Vec<TradeRecord> {
        pnls.iter()
            .enumerate()
            .map(|(i, &pnl)| TradeRecord {
                closed_at: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                ticker: "AAPL".into(),
                side: Side::Long,
                entry_price: 100.0,
                exit_price: 100.0,
                size: 1.0,
                pnl,
                entry_signal: String::new(),
                exit_signal: String::new(),
                note: String::new(),
            })
            .collect()
    }

    fn calm_provider() -> StaticProvider {
        StaticProvider::with_closes(&[100.0, 100.2, 100.1, 100.3], &[1000.0; 4])
    }

    fn wild_provider() -> StaticProvider {
        StaticProvider::with_closes(&[100.0, 110.0, 95.0, 108.0], &[1000.0; 4])
    }

    fn quiet_config() -> Config {
        Config {
            regime_narrative: false,
            ..Config::default()
        }
    }

    fn quiet_loop() -> CognitiveLoop<ScriptedGenerator, StaticProvider> {
        CognitiveLoop::new(ScriptedGenerator::always("x"), calm_provider(), quiet_config())
    }

    #[tokio::test]
    async fn test_reason_without_profile_fails() {
        let mut unit = quiet_loop();
        let perception = unit.perceive("AAPL", None).await;
        assert_eq!(unit.reason(&perception).await.unwrap_err(), MirrorError::ProfileNotInitialized);
    }

    #[tokio::test]
    async fn test_profile_cached_until_reprofile() {
        let mut unit = quiet_loop();
        let first = trades(&[50.0, -40.0, -30.0]);
        unit.run_cycle("AAPL", &first, None).await.unwrap();
        assert_eq!(unit.profile().unwrap().total_trades, 3);

        // New trades are ignored while a profile is cached
        let more = trades(&[50.0, -40.0, -30.0, 20.0, 20.0]);
        unit.run_cycle("AAPL", &more, None).await.unwrap();
        assert_eq!(unit.profile().unwrap().total_trades, 3);

        unit.reprofile(&more).unwrap();
        assert_eq!(unit.profile().unwrap().total_trades, 5);
    }

    #[tokio::test]
    async fn test_empty_history_fails_cycle() {
        let mut unit = quiet_loop();
        let err = unit.run_cycle("AAPL", &[], None).await.unwrap_err();
        assert!(matches!(err, MirrorError::Profile(_)));
    }

    #[tokio::test]
    async fn test_quiet_cycle_is_none_and_active() {
        let mut unit = quiet_loop();
        let action = Some(ActionInput::new("place_order"));
        let report = unit.run_cycle("AAPL", &trades(&[10.0, -5.0]), action).await.unwrap();
        assert_eq!(report.status, SystemStatus::Active);
        assert_eq!(report.intervention.kind, InterventionKind::None);
        assert_eq!(report.intervention.ui, None);
        assert_eq!(report.perception.interaction.place_count, 1);
        assert_eq!(unit.gateway().generator().calls(), 0);

        let diag = unit.diagnostics();
        assert_eq!(diag.buffered_interaction_count, 1);
        assert_eq!(diag.last_market.as_ref().unwrap().ticker, "AAPL");
        assert_eq!(diag.intervention_stats.total, 0);
        assert_eq!(diag.gateway, GatewayStats::default());
        assert_eq!(diag, unit.diagnostics());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_lock_cycle_carries_directive() {
        let gen = ScriptedGenerator::new(vec![
            Ok("regime: stressed".into()),
            Ok("tilt narrative".into()),
            Ok("Stop. Walk away.".into()),
        ]);
        let mut unit = CognitiveLoop::new(gen, wild_provider(), Config::default());
        for _ in 0..4 {
            unit.interaction_mut().record_action(CANCEL_ORDER, BTreeMap::new());
        }
        let history = trades(&[-150.0, -20.0, -200.0, -5.0, -300.0, -1.0]);
        let report = unit.run_cycle("TSLA", &history, None).await.unwrap();

        assert_eq!(report.reasoning.profile.dominant_bias, BiasLabel::LossAversionRevenge);
        assert_eq!(report.reasoning.tilt.score, 9);
        assert_eq!(report.intervention.kind, InterventionKind::HardLock);
        let ui = report.intervention.ui.unwrap();
        assert_eq!(ui.action, UiAction::LockTrading);
        assert_eq!(
            ui.historical_ref.as_deref(),
            Some("Similar to your LOSS_AVERSION_REVENGE pattern")
        );
        assert_eq!(ui.message, "Stop. Walk away.");
        assert_eq!(
            report.reasoning.regime_narrative,
            Some(RegimeNarrative { text: "regime: stressed".into(), fallback: false })
        );
        assert_eq!(unit.gateway().generator().calls(), 3);
        assert_eq!(unit.diagnostics().intervention_stats.hard_locks, 1);
    }

    #[tokio::test]
    async fn test_pointer_positions_feed_speed_window() {
        let mut unit = quiet_loop();
        let start = Utc::now() - chrono::Duration::seconds(2);
        assert_eq!(unit.track_pointer_at(0.0, 0.0, start), None);
        let later = start + chrono::Duration::milliseconds(500);
        let speed = unit.track_pointer_at(300.0, 400.0, later).unwrap();
        assert!((speed - 1000.0).abs() < 1e-9);

        let perception = unit.perceive("AAPL", None).await;
        assert!((perception.interaction.avg_pointer_speed - 1000.0).abs() < 1e-9);
        assert!(perception.interaction.erratic);
    }

    #[tokio::test]
    async fn test_briefing_and_sentiment_skip_service_when_offline() {
        let mut unit = CognitiveLoop::new(
            ScriptedGenerator::always("x"),
            StaticProvider::offline(),
            quiet_config(),
        );
        assert_eq!(unit.sentiment("AAPL").await, SentimentReport::Unknown);
        let briefing = unit.briefing(&["AAPL".to_string()]).await;
        assert!(briefing.fallback);
        assert_eq!(unit.gateway().generator().calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_message_is_not_reported_as_all_clear() {
        let gen = ScriptedGenerator::new(vec![
            Ok("tilt narrative".into()),
            Err(GatewayError::Provider("down".into())),
        ]);
        let mut unit = CognitiveLoop::new(gen, wild_provider(), quiet_config());
        for _ in 0..4 {
            unit.interaction_mut().record_action(CANCEL_ORDER, BTreeMap::new());
        }
        let history = trades(&[-150.0, -20.0, -200.0, -5.0, -300.0, -1.0]);
        let report = unit.run_cycle("TSLA", &history, None).await.unwrap();

        assert_eq!(report.reasoning.tilt.score, 9);
        assert_eq!(report.intervention.kind, InterventionKind::Error);
        assert!(!report.intervention.requires_ui_lock);
        let ui = report.intervention.ui.unwrap();
        assert_eq!(ui.title, "Intervention unavailable");
        assert_ne!(ui.title, "System OK");
        assert!(ui.message.starts_with("Failed to generate intervention"));
        assert_eq!(unit.diagnostics().intervention_stats.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_failure_surfaces_while_regime_falls_back() {
        let gen = ScriptedGenerator::failing(GatewayError::Provider("down".into()));
        let mut unit = CognitiveLoop::new(gen, wild_provider(), Config::default());
        for _ in 0..4 {
            unit.interaction_mut().record_action(CANCEL_ORDER, BTreeMap::new());
        }
        unit.initialize_profile(&trades(&[10.0])).unwrap();
        let perception = unit.perceive("TSLA", None).await;
        let err = unit.reason(&perception).await.unwrap_err();
        assert_eq!(
            err,
            MirrorError::Tilt(TiltError::Escalation(GatewayError::Provider("down".into())))
        );
    }
}
