//! Indicator taxonomy: the closed set of indicators a scenario must collect.

use crate::error::AggregatorError;
use std::fmt;

/// External (urban db) indicator identifier.
pub type IndicatorId = i64;

/// One of the five semantic slots of a completion record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorKind {
    Transport,
    Population,
    Ecology,
    Social,
    Engineering,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 5] = [
        IndicatorKind::Transport,
        IndicatorKind::Population,
        IndicatorKind::Ecology,
        IndicatorKind::Social,
        IndicatorKind::Engineering,
    ];

    /// The externally assigned id bound to this kind.
    pub const fn id(self) -> IndicatorId {
        match self {
            IndicatorKind::Transport => 198,
            IndicatorKind::Population => 197,
            IndicatorKind::Ecology => 199,
            IndicatorKind::Social => 200,
            IndicatorKind::Engineering => 204,
        }
    }

    /// Resolve an external id, rejecting anything outside the taxonomy.
    pub fn resolve(indicator_id: IndicatorId) -> Result<Self, AggregatorError> {
        match indicator_id {
            198 => Ok(IndicatorKind::Transport),
            197 => Ok(IndicatorKind::Population),
            199 => Ok(IndicatorKind::Ecology),
            200 => Ok(IndicatorKind::Social),
            204 => Ok(IndicatorKind::Engineering),
            other => Err(AggregatorError::UnsupportedIndicator(other)),
        }
    }

    /// Position of this kind's slot in a record.
    pub(crate) const fn slot(self) -> usize {
        match self {
            IndicatorKind::Transport => 0,
            IndicatorKind::Population => 1,
            IndicatorKind::Ecology => 2,
            IndicatorKind::Social => 3,
            IndicatorKind::Engineering => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            IndicatorKind::Transport => "transport",
            IndicatorKind::Population => "population",
            IndicatorKind::Ecology => "ecology",
            IndicatorKind::Social => "social",
            IndicatorKind::Engineering => "engineering",
        }
    }
}

impl TryFrom<IndicatorId> for IndicatorKind {
    type Error = AggregatorError;

    fn try_from(value: IndicatorId) -> Result<Self, Self::Error> {
        Self::resolve(value)
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}
