//! Per-object scaling state.
//!
//! Each cycle folds the trigger results into one aggregate value and drives
//! the Idle / Active / Cooldown machine. A cooldown keeps the object
//! considered scaled-up until the period has elapsed without any trigger
//! re-activating, which avoids flapping on noisy metrics.

use crate::evaluator::{TriggerError, TriggerReading};
use crate::spec::ObjectKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Active,
    Cooldown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Active => "active",
            Phase::Cooldown => "cooldown",
        })
    }
}

/// Last thing observed for one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TriggerOutcome {
    Reading { value: f64, active: bool },
    Failed { kind: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerStatus {
    pub outcome: TriggerOutcome,
    /// Activity from the most recent successful reading.
    pub active: bool,
    pub observed_at: DateTime<Utc>,
}

/// A trigger whose activity flipped during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityChange {
    pub trigger: String,
    pub active: bool,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Evaluated {
        transition: Option<(Phase, Phase)>,
        changes: Vec<ActivityChange>,
    },
    /// Every trigger failed; phase and value were left untouched.
    AllTriggersFailed { failures: Vec<(String, String)> },
}

/// Immutable view of an object's state, published after every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSnapshot {
    pub key: ObjectKey,
    pub phase: Phase,
    pub value: Option<f64>,
    /// Whether any trigger met its threshold in the last evaluated cycle.
    pub active: bool,
    pub phase_since: DateTime<Utc>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub triggers: BTreeMap<String, TriggerStatus>,
}

#[derive(Debug, Clone)]
pub struct ScalableObjectState {
    key: ObjectKey,
    cooldown: Duration,
    phase: Phase,
    value: Option<f64>,
    active: bool,
    phase_entered: Instant,
    phase_since: DateTime<Utc>,
    triggers: BTreeMap<String, TriggerStatus>,
    last_cycle_at: Option<DateTime<Utc>>,
    cycles: u64,
}

impl ScalableObjectState {
    pub fn new(key: ObjectKey, cooldown: Duration) -> Self {
        Self {
            key,
            cooldown,
            phase: Phase::Idle,
            value: None,
            active: false,
            phase_entered: Instant::now(),
            phase_since: Utc::now(),
            triggers: BTreeMap::new(),
            last_cycle_at: None,
            cycles: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Fold one cycle's trigger results into the state.
    pub fn apply_cycle(
        &mut self,
        results: &[(String, Result<TriggerReading, TriggerError>)],
        now: Instant,
        wall: DateTime<Utc>,
    ) -> CycleOutcome {
        self.cycles += 1;
        self.last_cycle_at = Some(wall);

        let mut changes = Vec::new();
        let mut failures = Vec::new();
        let mut aggregate: Option<f64> = None;
        let mut any_active = false;

        for (trigger, result) in results {
            match result {
                Ok(reading) => {
                    let was_active = self.triggers.get(trigger).is_some_and(|s| s.active);
                    if reading.active != was_active {
                        changes.push(ActivityChange {
                            trigger: trigger.clone(),
                            active: reading.active,
                            value: reading.value,
                        });
                    }
                    self.triggers.insert(
                        trigger.clone(),
                        TriggerStatus {
                            outcome: TriggerOutcome::Reading {
                                value: reading.value,
                                active: reading.active,
                            },
                            active: reading.active,
                            observed_at: wall,
                        },
                    );
                    aggregate = Some(aggregate.map_or(reading.value, |v| v.max(reading.value)));
                    any_active |= reading.active;
                }
                Err(error) => {
                    let active = self.triggers.get(trigger).is_some_and(|s| s.active);
                    self.triggers.insert(
                        trigger.clone(),
                        TriggerStatus {
                            outcome: TriggerOutcome::Failed {
                                kind: error.kind().to_string(),
                                error: error.to_string(),
                            },
                            active,
                            observed_at: wall,
                        },
                    );
                    failures.push((trigger.clone(), error.to_string()));
                }
            }
        }

        let Some(value) = aggregate else {
            if results.is_empty() {
                return CycleOutcome::Evaluated {
                    transition: None,
                    changes,
                };
            }
            return CycleOutcome::AllTriggersFailed { failures };
        };
        self.value = Some(value);
        self.active = any_active;

        let previous = self.phase;
        let next = match (self.phase, any_active) {
            (Phase::Idle, true) | (Phase::Cooldown, true) => Phase::Active,
            (Phase::Active, true) => Phase::Active,
            (Phase::Active, false) => Phase::Cooldown,
            (Phase::Cooldown, false) => {
                if now.saturating_duration_since(self.phase_entered) >= self.cooldown {
                    Phase::Idle
                } else {
                    Phase::Cooldown
                }
            }
            (Phase::Idle, false) => Phase::Idle,
        };

        let transition = if next != previous {
            self.phase = next;
            self.phase_entered = now;
            self.phase_since = wall;
            Some((previous, next))
        } else {
            None
        };

        CycleOutcome::Evaluated {
            transition,
            changes,
        }
    }

    pub fn snapshot(&self) -> ObjectSnapshot {
        ObjectSnapshot {
            key: self.key.clone(),
            phase: self.phase,
            value: self.value,
            active: self.active,
            phase_since: self.phase_since,
            last_cycle_at: self.last_cycle_at,
            cycles: self.cycles,
            triggers: self.triggers.clone(),
        }
    }
}
