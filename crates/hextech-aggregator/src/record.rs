//! Per-scenario completion record.

use crate::taxonomy::{IndicatorId, IndicatorKind};

/// Five optional slots, one per [`IndicatorKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionRecord {
    slots: [Option<IndicatorId>; 5],
}

impl CompletionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the slot for `kind` and return the new completeness.
    ///
    /// Idempotent with respect to the kind: writing the same slot twice only
    /// replaces the stored id.
    pub fn set(&mut self, kind: IndicatorKind, indicator_id: IndicatorId) -> bool {
        self.slots[kind.slot()] = Some(indicator_id);
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn get(&self, kind: IndicatorKind) -> Option<IndicatorId> {
        self.slots[kind.slot()]
    }

    /// Number of occupied slots.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Kinds still waiting for an update, in taxonomy order.
    pub fn missing(&self) -> Vec<IndicatorKind> {
        IndicatorKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }
}
