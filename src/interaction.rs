//! Interaction perception: bounded buffers of trader actions and pointer
//! speed, summarized over a trailing window on demand.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::InteractionConfig;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

pub const CANCEL_ORDER: &str = "cancel_order";
pub const PLACE_ORDER: &str = "place_order";

const POINTER_HISTORY: usize = 100;

/// Fixed-capacity FIFO. Pushing at capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns the evicted entry, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionEvent {
    pub ts: DateTime<Utc>,
    pub action: String,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointerSpeedSample {
    pub ts: DateTime<Utc>,
    /// Pixels per second
    pub speed: f64,
}

/// Windowed summary. Derived fresh on every query, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionStats {
    pub total_actions: usize,
    pub cancel_count: usize,
    pub place_count: usize,
    pub action_counts: BTreeMap<String, usize>,
    pub avg_pointer_speed: f64,
    pub erratic: bool,
    /// Actions per minute over the window
    pub velocity_score: f64,
}

pub struct InteractionPerception {
    actions: RingBuffer<InteractionEvent>,
    speeds: RingBuffer<PointerSpeedSample>,
    cfg: InteractionConfig,
}

impl InteractionPerception {
    pub fn new(cfg: InteractionConfig) -> Self {
        Self {
            actions: RingBuffer::new(cfg.action_capacity),
            speeds: RingBuffer::new(cfg.speed_capacity),
            cfg,
        }
    }

    pub fn record_action(&mut self, label: &str, metadata: BTreeMap<String, Value>) {
        self.record_action_at(label, metadata, Utc::now());
    }

    pub fn record_action_at(
        &mut self,
        label: &str,
        metadata: BTreeMap<String, Value>,
        ts: DateTime<Utc>,
    ) {
        self.actions.push(InteractionEvent {
            ts,
            action: label.to_string(),
            metadata,
        });
        log(
            Level::Debug,
            Domain::Interaction,
            "action_recorded",
            obj(&[("action", v_str(label)), ("buffered", serde_json::json!(self.actions.len()))]),
        );
    }

    pub fn record_speed(&mut self, speed: f64) {
        self.record_speed_at(speed, Utc::now());
    }

    pub fn record_speed_at(&mut self, speed: f64, ts: DateTime<Utc>) {
        self.speeds.push(PointerSpeedSample { ts, speed });
        log(
            Level::Trace,
            Domain::Interaction,
            "speed_recorded",
            obj(&[("speed", v_num(speed))]),
        );
    }

    pub fn buffered_actions(&self) -> usize {
        self.actions.len()
    }

    pub fn actions(&self) -> &RingBuffer<InteractionEvent> {
        &self.actions
    }

    pub fn stats(&self, window_minutes: u32) -> InteractionStats {
        self.stats_at(window_minutes, Utc::now())
    }

    /// Summary of entries strictly newer than `now - window`.
    pub fn stats_at(&self, window_minutes: u32, now: DateTime<Utc>) -> InteractionStats {
        let cutoff = now - Duration::minutes(i64::from(window_minutes));

        let mut action_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_actions = 0;
        for event in self.actions.iter().filter(|e| e.ts > cutoff) {
            *action_counts.entry(event.action.clone()).or_default() += 1;
            total_actions += 1;
        }
        let cancel_count = action_counts.get(CANCEL_ORDER).copied().unwrap_or(0);
        let place_count = action_counts.get(PLACE_ORDER).copied().unwrap_or(0);

        let recent: Vec<f64> = self
            .speeds
            .iter()
            .filter(|s| s.ts > cutoff)
            .map(|s| s.speed)
            .collect();
        let avg_pointer_speed = crate::market::indicators::mean(&recent);

        let erratic = cancel_count > self.cfg.erratic_cancels
            || place_count > self.cfg.erratic_places
            || avg_pointer_speed > self.cfg.erratic_speed;

        InteractionStats {
            total_actions,
            cancel_count,
            place_count,
            action_counts,
            avg_pointer_speed,
            erratic,
            velocity_score: total_actions as f64 / f64::from(window_minutes.max(1)),
        }
    }
}

/// Turns raw pointer positions into speeds in pixels per second.
#[derive(Debug, Clone)]
pub struct PointerTracker {
    positions: RingBuffer<(f64, f64, DateTime<Utc>)>,
}

impl Default for PointerTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerTracker {
    pub fn new() -> Self {
        Self {
            positions: RingBuffer::new(POINTER_HISTORY),
        }
    }

    /// Records a position; returns the speed since the previous one when
    /// time has advanced.
    pub fn track(&mut self, x: f64, y: f64, ts: DateTime<Utc>) -> Option<f64> {
        let prev = self.positions.iter().last().copied();
        self.positions.push((x, y, ts));
        let (px, py, pts) = prev?;
        let dt = (ts - pts).num_milliseconds() as f64 / 1000.0;
        if dt <= 0.0 {
            return None;
        }
        Some(((x - px).powi(2) + (y - py).powi(2)).sqrt() / dt)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
