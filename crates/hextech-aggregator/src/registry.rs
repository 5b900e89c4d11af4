//! Scenario registry: scenario id → completion record.
//!
//! Each handler owns its own registry. The read-modify-check sequence for a
//! scenario runs under that scenario's record lock, so two indicator events
//! for the same scenario landing on different partitions cannot both miss
//! (or both claim) the completion.
//!
//! Lock order is always record mutex → map shard. The map shard lock is
//! never held while waiting on a record mutex.

use crate::events::ScenarioId;
use crate::record::CompletionRecord;
use crate::taxonomy::{IndicatorId, IndicatorKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Completion Mode
// ============================================================================

/// What happens once a record has fired its downstream action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Fire once, then drop the record. Indicators arriving afterwards start
    /// a fresh cycle for the scenario.
    #[default]
    EvictOnFire,
    /// Keep the record and suppress every later trigger.
    Latch,
    /// Fire on every observation that finds the record complete.
    Retrigger,
}

impl CompletionMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            CompletionMode::EvictOnFire => "evict_on_fire",
            CompletionMode::Latch => "latch",
            CompletionMode::Retrigger => "retrigger",
        }
    }
}

impl fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "evict_on_fire" | "evict" => Ok(Self::EvictOnFire),
            "latch" => Ok(Self::Latch),
            "retrigger" => Ok(Self::Retrigger),
            other => Err(format!(
                "unknown completion mode `{other}` (expected evict_on_fire|latch|retrigger)"
            )),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Result of applying one indicator to a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Slot recorded; the record is still incomplete.
    Pending { filled: usize },
    /// The record is complete and the caller must run the downstream action.
    Fire,
    /// The record is complete but already fired; nothing to do.
    AlreadyFired,
}

/// A completion record plus the registry's bookkeeping for it.
#[derive(Debug, Default)]
pub struct TrackedRecord {
    record: CompletionRecord,
    fired: bool,
    retired: bool,
}

impl TrackedRecord {
    pub fn record(&self) -> &CompletionRecord {
        &self.record
    }

    /// Retired records are no longer reachable from the registry.
    pub fn is_retired(&self) -> bool {
        self.retired
    }
}

/// Shared handle to a scenario's record.
pub type RecordHandle = Arc<Mutex<TrackedRecord>>;

#[derive(Debug)]
struct RegistryEntry {
    handle: RecordHandle,
    touched: u64,
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug)]
pub struct ScenarioRegistry {
    records: DashMap<ScenarioId, RegistryEntry>,
    mode: CompletionMode,
    max_records: Option<usize>,
    clock: AtomicU64,
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        Self::new(CompletionMode::default(), None)
    }
}

impl ScenarioRegistry {
    pub fn new(mode: CompletionMode, max_records: Option<usize>) -> Self {
        Self {
            records: DashMap::new(),
            mode,
            max_records,
            clock: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// Return the scenario's record, inserting an empty one if absent.
    ///
    /// Concurrent callers with the same unseen id all receive the same handle.
    pub fn get_or_create(&self, scenario_id: ScenarioId) -> RecordHandle {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let (handle, inserted) = match self.records.entry(scenario_id) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().touched = tick;
                (occupied.get().handle.clone(), false)
            }
            Entry::Vacant(vacant) => {
                let handle = RecordHandle::default();
                vacant.insert(RegistryEntry {
                    handle: handle.clone(),
                    touched: tick,
                });
                (handle, true)
            }
        };

        if inserted {
            self.enforce_capacity(scenario_id);
        }
        handle
    }

    /// Apply one resolved indicator to a scenario as a single critical section.
    pub fn observe(
        &self,
        scenario_id: ScenarioId,
        kind: IndicatorKind,
        indicator_id: IndicatorId,
    ) -> Observation {
        loop {
            let handle = self.get_or_create(scenario_id);
            let mut tracked = handle.lock();
            if tracked.retired {
                // Evicted between lookup and lock; the next lookup sees a fresh record.
                continue;
            }

            if !tracked.record.set(kind, indicator_id) {
                return Observation::Pending {
                    filled: tracked.record.filled(),
                };
            }

            let observation = match self.mode {
                CompletionMode::Retrigger => Observation::Fire,
                _ if tracked.fired => Observation::AlreadyFired,
                _ => Observation::Fire,
            };
            tracked.fired = true;

            if self.mode == CompletionMode::EvictOnFire {
                tracked.retired = true;
                self.records
                    .remove_if(&scenario_id, |_, entry| Arc::ptr_eq(&entry.handle, &handle));
            }
            return observation;
        }
    }

    /// Snapshot of a scenario's record, if one is live.
    pub fn snapshot(&self, scenario_id: ScenarioId) -> Option<CompletionRecord> {
        let handle = self.records.get(&scenario_id)?.handle.clone();
        let tracked = handle.lock();
        Some(tracked.record.clone())
    }

    pub fn contains(&self, scenario_id: ScenarioId) -> bool {
        self.records.contains_key(&scenario_id)
    }

    /// Drop a scenario's record. Returns whether one was present.
    pub fn remove(&self, scenario_id: ScenarioId) -> bool {
        match self.records.remove(&scenario_id) {
            Some((_, entry)) => {
                entry.handle.lock().retired = true;
                true
            }
            None => false,
        }
    }

    /// Drop every record.
    pub fn clear(&self) {
        let ids: Vec<ScenarioId> = self.records.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn enforce_capacity(&self, keep: ScenarioId) {
        let Some(max) = self.max_records else {
            return;
        };

        while self.records.len() > max {
            let victim = self
                .records
                .iter()
                .filter(|entry| *entry.key() != keep)
                .min_by_key(|entry| entry.value().touched)
                .map(|entry| *entry.key());
            let Some(victim) = victim else {
                break;
            };
            if self.remove(victim) {
                tracing::warn!(
                    scenario_id = victim,
                    max_records = max,
                    "evicted least recently touched scenario record"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(registry: &ScenarioRegistry, scenario_id: ScenarioId) -> Vec<Observation> {
        IndicatorKind::ALL
            .into_iter()
            .map(|kind| registry.observe(scenario_id, kind, kind.id()))
            .collect()
    }

    #[test]
    fn get_or_create_returns_same_handle() {
        let registry = ScenarioRegistry::default();
        let a = registry.get_or_create(42);
        let b = registry.get_or_create(42);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn fires_on_fifth_indicator_only() {
        let registry = ScenarioRegistry::default();
        let observations = complete(&registry, 1);
        assert_eq!(
            observations,
            vec![
                Observation::Pending { filled: 1 },
                Observation::Pending { filled: 2 },
                Observation::Pending { filled: 3 },
                Observation::Pending { filled: 4 },
                Observation::Fire,
            ]
        );
    }

    #[test]
    fn evict_on_fire_starts_a_fresh_cycle() {
        let registry = ScenarioRegistry::new(CompletionMode::EvictOnFire, None);
        complete(&registry, 42);
        assert!(!registry.contains(42));

        let again = registry.observe(42, IndicatorKind::Population, 197);
        assert_eq!(again, Observation::Pending { filled: 1 });
        assert_eq!(complete(&registry, 42).last(), Some(&Observation::Fire));
    }

    #[test]
    fn latch_suppresses_later_triggers() {
        let registry = ScenarioRegistry::new(CompletionMode::Latch, None);
        complete(&registry, 42);
        assert_eq!(
            registry.observe(42, IndicatorKind::Population, 197),
            Observation::AlreadyFired
        );
        assert!(registry.contains(42));
    }

    #[test]
    fn retrigger_fires_on_every_complete_observation() {
        let registry = ScenarioRegistry::new(CompletionMode::Retrigger, None);
        complete(&registry, 42);
        assert_eq!(
            registry.observe(42, IndicatorKind::Population, 197),
            Observation::Fire
        );
    }

    #[test]
    fn capacity_evicts_least_recently_touched() {
        let registry = ScenarioRegistry::new(CompletionMode::EvictOnFire, Some(2));
        registry.observe(1, IndicatorKind::Transport, 198);
        registry.observe(2, IndicatorKind::Transport, 198);
        registry.observe(1, IndicatorKind::Ecology, 199);
        registry.observe(3, IndicatorKind::Transport, 198);

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(1));
        assert!(!registry.contains(2));
        assert!(registry.contains(3));
    }

    #[test]
    fn stale_handle_is_retired_after_remove() {
        let registry = ScenarioRegistry::default();
        let handle = registry.get_or_create(5);
        assert!(registry.remove(5));
        assert!(handle.lock().is_retired());
        assert!(!registry.remove(5));

        assert_eq!(
            registry.observe(5, IndicatorKind::Social, 200),
            Observation::Pending { filled: 1 }
        );
        assert!(!Arc::ptr_eq(&handle, &registry.get_or_create(5)));
    }

    #[test]
    fn clear_empties_registry() {
        let registry = ScenarioRegistry::default();
        registry.observe(1, IndicatorKind::Social, 200);
        registry.observe(2, IndicatorKind::Social, 200);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn mode_parses_from_config_strings() {
        assert_eq!("latch".parse::<CompletionMode>(), Ok(CompletionMode::Latch));
        assert_eq!(
            "evict-on-fire".parse::<CompletionMode>(),
            Ok(CompletionMode::EvictOnFire)
        );
        assert_eq!(
            " Retrigger ".parse::<CompletionMode>(),
            Ok(CompletionMode::Retrigger)
        );
        assert!("sometimes".parse::<CompletionMode>().is_err());
    }
}
