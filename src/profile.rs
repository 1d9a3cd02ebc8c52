//! Trader profiling: behavioral metrics over the closed-trade history and
//! the single dominant bias they point to.

use serde::Serialize;

use crate::config::ProfileConfig;
use crate::error::ProfileError;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::market::indicators::mean;
use crate::trades::TradeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BiasLabel {
    LossAversionRevenge,
    FomoOvertrading,
    PoorEdgeExecution,
    CuttingWinnersEarly,
    DisciplinedTrader,
}

impl BiasLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasLabel::LossAversionRevenge => "LOSS_AVERSION_REVENGE",
            BiasLabel::FomoOvertrading => "FOMO_OVERTRADING",
            BiasLabel::PoorEdgeExecution => "POOR_EDGE_EXECUTION",
            BiasLabel::CuttingWinnersEarly => "CUTTING_WINNERS_EARLY",
            BiasLabel::DisciplinedTrader => "DISCIPLINED_TRADER",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BiasLabel::LossAversionRevenge => "Attempts to recover losses immediately",
            BiasLabel::FomoOvertrading => "Enters trades based on fear of missing out",
            BiasLabel::PoorEdgeExecution => "Low win rate indicates strategy issues",
            BiasLabel::CuttingWinnersEarly => "Exits profitable trades too quickly",
            BiasLabel::DisciplinedTrader => "Follows plan consistently",
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        match self {
            BiasLabel::LossAversionRevenge => RiskLevel::High,
            BiasLabel::FomoOvertrading | BiasLabel::PoorEdgeExecution => RiskLevel::Medium,
            BiasLabel::CuttingWinnersEarly | BiasLabel::DisciplinedTrader => RiskLevel::Low,
        }
    }

    /// 0 (none) to 9 (most urgent)
    pub fn intervention_priority(&self) -> u8 {
        match self {
            BiasLabel::LossAversionRevenge => 9,
            BiasLabel::FomoOvertrading => 6,
            BiasLabel::PoorEdgeExecution => 5,
            BiasLabel::CuttingWinnersEarly => 4,
            BiasLabel::DisciplinedTrader => 0,
        }
    }
}

impl std::fmt::Display for BiasLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraderProfile {
    pub total_trades: usize,
    /// Percent, one decimal
    pub win_rate: f64,
    pub avg_win: f64,
    /// Negative or zero
    pub avg_loss: f64,
    pub revenge_signal_count: usize,
    pub fomo_count: usize,
    pub risk_reward_ratio: f64,
    pub dominant_bias: BiasLabel,
}

fn round_to(x: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (x * f).round() / f
}

pub struct ProfileBuilder {
    cfg: ProfileConfig,
    keywords: Vec<String>,
}

impl ProfileBuilder {
    pub fn new(cfg: ProfileConfig) -> Self {
        let keywords = cfg.fomo_keywords.iter().map(|k| k.to_lowercase()).collect();
        Self { cfg, keywords }
    }

    /// Trades must be in chronological order; the revenge count depends on it.
    pub fn profile(&self, trades: &[TradeRecord]) -> Result<TraderProfile, ProfileError> {
        if trades.is_empty() {
            return Err(ProfileError::InsufficientData);
        }
        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

        let avg_win = round_to(mean(&wins), 2);
        let avg_loss = round_to(mean(&losses), 2);
        let risk_reward_ratio = if avg_loss != 0.0 {
            round_to((avg_win / avg_loss).abs(), 2)
        } else {
            0.0
        };

        let mut profile = TraderProfile {
            total_trades: trades.len(),
            win_rate: round_to(wins.len() as f64 / trades.len() as f64 * 100.0, 1),
            avg_win,
            avg_loss,
            revenge_signal_count: self.revenge_signals(&pnls),
            fomo_count: trades.iter().filter(|t| self.is_fomo_note(&t.note)).count(),
            risk_reward_ratio,
            dominant_bias: BiasLabel::DisciplinedTrader,
        };
        profile.dominant_bias = self.classify(&profile);

        log(
            Level::Info,
            Domain::Profile,
            "profile_built",
            obj(&[
                ("total_trades", serde_json::json!(profile.total_trades)),
                ("win_rate", v_num(profile.win_rate)),
                ("revenge_signals", serde_json::json!(profile.revenge_signal_count)),
                ("fomo_count", serde_json::json!(profile.fomo_count)),
                ("bias", v_str(profile.dominant_bias.as_str())),
            ]),
        );
        Ok(profile)
    }

    /// A loss following a large loss, counted over adjacent pairs.
    pub fn revenge_signals(&self, pnls: &[f64]) -> usize {
        let threshold = -self.cfg.revenge_loss_threshold;
        pnls.windows(2).filter(|w| w[0] < threshold && w[1] < 0.0).count()
    }

    fn is_fomo_note(&self, note: &str) -> bool {
        if note.is_empty() {
            return false;
        }
        let lower = note.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// First matching rule wins.
    pub fn classify(&self, p: &TraderProfile) -> BiasLabel {
        if p.revenge_signal_count > 2 {
            BiasLabel::LossAversionRevenge
        } else if p.fomo_count > 3 {
            BiasLabel::FomoOvertrading
        } else if p.win_rate < self.cfg.min_win_rate {
            BiasLabel::PoorEdgeExecution
        } else if p.risk_reward_ratio < self.cfg.min_risk_reward {
            BiasLabel::CuttingWinnersEarly
        } else {
            BiasLabel::DisciplinedTrader
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trades::Side;
    use chrono::NaiveDate;

    fn trades(pnls: &[f64], notes: &[&str]) -> Vec<TradeRecord> {
        pnls.iter()
            .enumerate()
            .map(|(i, &pnl)| TradeRecord {
                closed_at: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                ticker: "SPY".into(),
                side: Side::Long,
                entry_price: 500.0,
                exit_price: 500.0 + pnl,
                size: 1.0,
                pnl,
                entry_signal: String::new(),
                exit_signal: String::new(),
                note: notes.get(i).copied().unwrap_or("").to_string(),
            })
            .collect()
    }

    fn builder() -> ProfileBuilder {
        ProfileBuilder::new(ProfileConfig::default())
    }

    fn base_profile() -> TraderProfile {
        TraderProfile {
            total_trades: 20,
            win_rate: 55.0,
            avg_win: 200.0,
            avg_loss: -100.0,
            revenge_signal_count: 0,
            fomo_count: 0,
            risk_reward_ratio: 2.0,
            dominant_bias: BiasLabel::DisciplinedTrader,
        }
    }

    #[test]
    fn test_revenge_count_is_order_sensitive() {
        let b = builder();
        assert_eq!(b.revenge_signals(&[-150.0, -20.0, 30.0, -200.0, -5.0]), 2);
        assert_eq!(b.revenge_signals(&[-20.0, -150.0, 30.0, -5.0, -200.0]), 0);
    }

    #[test]
    fn test_revenge_beats_fomo() {
        let p = TraderProfile {
            revenge_signal_count: 3,
            fomo_count: 5,
            ..base_profile()
        };
        assert_eq!(builder().classify(&p), BiasLabel::LossAversionRevenge);
    }

    #[test]
    fn test_classification_order() {
        let b = builder();
        let fomo = TraderProfile {
            fomo_count: 4,
            win_rate: 10.0,
            ..base_profile()
        };
        assert_eq!(b.classify(&fomo), BiasLabel::FomoOvertrading);

        let poor_edge = TraderProfile {
            win_rate: 39.9,
            risk_reward_ratio: 0.5,
            ..base_profile()
        };
        assert_eq!(b.classify(&poor_edge), BiasLabel::PoorEdgeExecution);

        let early_exit = TraderProfile {
            risk_reward_ratio: 1.49,
            ..base_profile()
        };
        assert_eq!(b.classify(&early_exit), BiasLabel::CuttingWinnersEarly);
        assert_eq!(b.classify(&base_profile()), BiasLabel::DisciplinedTrader);
    }

    #[test]
    fn test_poor_edge_profile() {
        let pnls = [50.0, -40.0, -30.0, 60.0, -20.0, -50.0, 70.0, -10.0, -60.0, -30.0];
        let p = builder().profile(&trades(&pnls, &[])).unwrap();
        assert_eq!(p.total_trades, 10);
        assert_eq!(p.win_rate, 30.0);
        assert_eq!(p.revenge_signal_count, 0);
        assert_eq!(p.fomo_count, 0);
        assert_eq!(p.avg_win, 60.0);
        assert_eq!(p.avg_loss, -34.29);
        assert_eq!(p.risk_reward_ratio, 1.75);
        assert_eq!(p.dominant_bias, BiasLabel::PoorEdgeExecution);
    }

    #[test]
    fn test_fomo_keywords_case_insensitive() {
        let notes = ["fomo entry", "REVENGE trade", "Felt PANIC", "calm", "", "rushed it"];
        let p = builder().profile(&trades(&[10.0; 6], &notes)).unwrap();
        assert_eq!(p.fomo_count, 4);
        assert_eq!(p.dominant_bias, BiasLabel::FomoOvertrading);
    }

    #[test]
    fn test_no_losses_gives_zero_ratio() {
        let p = builder().profile(&trades(&[10.0, 20.0], &[])).unwrap();
        assert_eq!(p.avg_loss, 0.0);
        assert_eq!(p.risk_reward_ratio, 0.0);
        assert_eq!(p.win_rate, 100.0);
        assert_eq!(p.dominant_bias, BiasLabel::CuttingWinnersEarly);
    }

    #[test]
    fn test_empty_history_is_insufficient() {
        assert_eq!(builder().profile(&[]), Err(ProfileError::InsufficientData));
    }

    #[test]
    fn test_bias_metadata() {
        assert_eq!(BiasLabel::LossAversionRevenge.intervention_priority(), 9);
        assert_eq!(BiasLabel::FomoOvertrading.risk_level(), RiskLevel::Medium);
        assert_eq!(
            serde_json::to_string(&BiasLabel::PoorEdgeExecution).unwrap(),
            "\"POOR_EDGE_EXECUTION\""
        );
    }
}
