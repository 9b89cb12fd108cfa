//! Metric state store.
//!
//! Holds the last published value per lifecycle state plus the scrape error
//! counter. The scraper is the only writer; any number of HTTP handlers read
//! concurrently through [`MetricsStore::snapshot`].

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tracing::debug;

use crate::classifier::StateCounts;
use crate::domain::LifecycleState;

/// How [`MetricsStore::publish`] turns a new count into the exposed value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum UpdateDiscipline {
    /// Overwrite the value, like a "current level" gauge.
    #[default]
    Absolute,
    /// Drive a bidirectional counter with the signed difference to the
    /// previous value.
    Delta,
}

/// Per-state slot. Every field is a single atomic so readers never see a torn
/// value.
#[derive(Debug)]
struct StateSlot {
    state: LifecycleState,
    last: AtomicU64,
    accumulator: AtomicI64,
    increments: AtomicU64,
}

impl StateSlot {
    fn new(state: LifecycleState) -> Self {
        Self {
            state,
            last: AtomicU64::new(0),
            accumulator: AtomicI64::new(0),
            increments: AtomicU64::new(0),
        }
    }
}

/// The metric state store.
#[derive(Debug)]
pub struct MetricsStore {
    discipline: UpdateDiscipline,
    slots: Vec<StateSlot>,
    scrape_errors: AtomicU64,
}

impl MetricsStore {
    /// Create a store with every value at zero.
    pub fn new(states: &[LifecycleState], discipline: UpdateDiscipline) -> Self {
        Self {
            discipline,
            slots: states.iter().cloned().map(StateSlot::new).collect(),
            scrape_errors: AtomicU64::new(0),
        }
    }

    pub fn discipline(&self) -> UpdateDiscipline {
        self.discipline
    }

    /// States tracked by this store, in configured order.
    pub fn states(&self) -> impl Iterator<Item = &LifecycleState> {
        self.slots.iter().map(|slot| &slot.state)
    }

    fn slot(&self, state: &LifecycleState) -> Option<&StateSlot> {
        self.slots.iter().find(|slot| &slot.state == state)
    }

    // ========== Writer side ==========

    /// Publish a new count for a state.
    ///
    /// Returns `false` (and changes nothing) when the store does not track
    /// `state`. On return the state's last value equals `new_count` under
    /// either discipline.
    pub fn publish(&self, state: &LifecycleState, new_count: u64) -> bool {
        let Some(slot) = self.slot(state) else {
            return false;
        };

        match self.discipline {
            UpdateDiscipline::Absolute => {
                slot.last.store(new_count, Ordering::Relaxed);
            }
            UpdateDiscipline::Delta => {
                // Single writer: nothing can move `last` between load and store.
                let previous = slot.last.load(Ordering::Relaxed);
                let delta = new_count as i64 - previous as i64;
                if delta != 0 {
                    slot.accumulator.fetch_add(delta, Ordering::Relaxed);
                    slot.increments.fetch_add(1, Ordering::Relaxed);
                    debug!(state = %slot.state, delta, "Applied state delta");
                }
                slot.last.store(new_count, Ordering::Relaxed);
            }
        }
        true
    }

    /// Publish every count of a classified listing.
    pub fn publish_counts(&self, counts: &StateCounts) {
        for (state, count) in counts.iter() {
            self.publish(state, count);
        }
    }

    /// Force every tracked state to zero.
    pub fn publish_zero(&self) {
        for slot in &self.slots {
            self.publish(&slot.state, 0);
        }
    }

    /// Add one to the scrape error counter.
    pub fn increment_errors(&self) {
        self.scrape_errors.fetch_add(1, Ordering::Relaxed);
    }

    // ========== Reader side ==========

    /// Last published count for a state.
    pub fn last_value(&self, state: &LifecycleState) -> Option<u64> {
        self.slot(state).map(|slot| slot.last.load(Ordering::Relaxed))
    }

    /// Value exposed to the monitoring system for a state.
    pub fn exposed_value(&self, state: &LifecycleState) -> Option<i64> {
        self.slot(state).map(|slot| self.exposed(slot))
    }

    /// Number of non-zero increments emitted for a state (delta discipline).
    pub fn increments_emitted(&self, state: &LifecycleState) -> Option<u64> {
        self.slot(state)
            .map(|slot| slot.increments.load(Ordering::Relaxed))
    }

    pub fn scrape_errors(&self) -> u64 {
        self.scrape_errors.load(Ordering::Relaxed)
    }

    fn exposed(&self, slot: &StateSlot) -> i64 {
        match self.discipline {
            UpdateDiscipline::Absolute => slot.last.load(Ordering::Relaxed) as i64,
            UpdateDiscipline::Delta => slot.accumulator.load(Ordering::Relaxed),
        }
    }

    /// Read every value.
    ///
    /// Each value is loaded on its own; a snapshot taken while a cycle is
    /// publishing may mix old and new states.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            discipline: self.discipline,
            states: self
                .slots
                .iter()
                .map(|slot| StateValue {
                    state: slot.state.clone(),
                    value: self.exposed(slot),
                })
                .collect(),
            scrape_errors: self.scrape_errors(),
        }
    }
}

/// Value of one state at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateValue {
    pub state: LifecycleState,
    pub value: i64,
}

/// A point-in-time read of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub discipline: UpdateDiscipline,
    pub states: Vec<StateValue>,
    pub scrape_errors: u64,
}

impl StoreSnapshot {
    pub fn value_of(&self, token: &str) -> Option<i64> {
        self.states
            .iter()
            .find(|v| v.state.token() == token)
            .map(|v| v.value)
    }
}
