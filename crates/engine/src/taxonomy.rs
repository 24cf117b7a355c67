//! Phase vocabulary: the current phase tokens, their display labels, the
//! category partition, and the table that rewrites superseded tokens found in
//! older stored ledgers.
//!
//! Two generations of vocabulary have been retired so far:
//!
//! ```text
//! germination, seedling ─────────────▶ early_veg
//! vegetative, mid_veg, late_veg ─────▶ mid_late_veg
//! flowering, mid_flower, late_flower ▶ mid_late_flower
//! harvest, done ─────────────────────▶ drying
//! ```
//!
//! `done` is remapped wholesale to `drying`; historical days are not split
//! between drying and curing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    EarlyVeg,
    MidLateVeg,
    EarlyFlower,
    MidLateFlower,
    Flushing,
    Drying,
    Curing,

    // Superseded tokens. Only ever read from stored ledgers.
    Germination,
    Seedling,
    Vegetative,
    MidVeg,
    LateVeg,
    Flowering,
    MidFlower,
    LateFlower,
    Harvest,
    Done,
}

impl Phase {
    /// Current vocabulary in lifecycle order.
    pub const ALL_CURRENT: [Phase; 7] = [
        Phase::EarlyVeg,
        Phase::MidLateVeg,
        Phase::EarlyFlower,
        Phase::MidLateFlower,
        Phase::Flushing,
        Phase::Drying,
        Phase::Curing,
    ];

    pub const LEGACY: [Phase; 10] = [
        Phase::Germination,
        Phase::Seedling,
        Phase::Vegetative,
        Phase::MidVeg,
        Phase::LateVeg,
        Phase::Flowering,
        Phase::MidFlower,
        Phase::LateFlower,
        Phase::Harvest,
        Phase::Done,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::EarlyVeg => "early_veg",
            Phase::MidLateVeg => "mid_late_veg",
            Phase::EarlyFlower => "early_flower",
            Phase::MidLateFlower => "mid_late_flower",
            Phase::Flushing => "flushing",
            Phase::Drying => "drying",
            Phase::Curing => "curing",
            Phase::Germination => "germination",
            Phase::Seedling => "seedling",
            Phase::Vegetative => "vegetative",
            Phase::MidVeg => "mid_veg",
            Phase::LateVeg => "late_veg",
            Phase::Flowering => "flowering",
            Phase::MidFlower => "mid_flower",
            Phase::LateFlower => "late_flower",
            Phase::Harvest => "harvest",
            Phase::Done => "done",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Phase::EarlyVeg => "Early Veg",
            Phase::MidLateVeg => "Mid/Late Veg",
            Phase::EarlyFlower => "Early Flower",
            Phase::MidLateFlower => "Mid/Late Flower",
            Phase::Flushing => "Flushing",
            Phase::Drying => "Drying",
            Phase::Curing => "Curing",
            Phase::Germination => "Germination",
            Phase::Seedling => "Seedling",
            Phase::Vegetative => "Vegetative",
            Phase::MidVeg => "Mid Veg",
            Phase::LateVeg => "Late Veg",
            Phase::Flowering => "Flowering",
            Phase::MidFlower => "Mid Flower",
            Phase::LateFlower => "Late Flower",
            Phase::Harvest => "Harvest",
            Phase::Done => "Done",
        }
    }

    pub const fn is_current(self) -> bool {
        matches!(
            self,
            Phase::EarlyVeg
                | Phase::MidLateVeg
                | Phase::EarlyFlower
                | Phase::MidLateFlower
                | Phase::Flushing
                | Phase::Drying
                | Phase::Curing
        )
    }

    /// The current-vocabulary phase this token stands for. Identity on
    /// current phases.
    pub const fn current(self) -> Phase {
        match self {
            Phase::Germination | Phase::Seedling => Phase::EarlyVeg,
            Phase::Vegetative | Phase::MidVeg | Phase::LateVeg => Phase::MidLateVeg,
            Phase::Flowering | Phase::MidFlower | Phase::LateFlower => Phase::MidLateFlower,
            Phase::Harvest | Phase::Done => Phase::Drying,
            current => current,
        }
    }

    pub const fn category(self) -> Category {
        match self.current() {
            Phase::EarlyVeg | Phase::MidLateVeg => Category::Veg,
            Phase::EarlyFlower | Phase::MidLateFlower | Phase::Flushing => Category::Flower,
            _ => Category::PostHarvest,
        }
    }

    /// This phase plus every superseded token that migrates into it. Used to
    /// count days on ledgers that have not been migrated yet.
    pub fn synonyms(self) -> Vec<Phase> {
        let mut out = vec![self];
        if self.is_current() {
            out.extend(Phase::LEGACY.into_iter().filter(|p| p.current() == self));
        }
        out
    }

    /// Reverse lookup from a display label (current vocabulary only).
    pub fn from_label(label: &str) -> Option<Phase> {
        Phase::ALL_CURRENT
            .into_iter()
            .find(|p| p.label().eq_ignore_ascii_case(label.trim()))
    }

    /// Parse a token that must name a selectable (current) phase. Legacy and
    /// unknown tokens are both rejected as `InvalidPhase`.
    pub fn parse_current(token: &str) -> Result<Phase> {
        match token.parse::<Phase>() {
            Ok(phase) if phase.is_current() => Ok(phase),
            _ => Err(EngineError::InvalidPhase {
                token: token.to_string(),
            }),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = EngineError;

    /// Accepts every token of every vocabulary generation.
    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        Phase::ALL_CURRENT
            .into_iter()
            .chain(Phase::LEGACY)
            .find(|p| p.as_str() == token)
            .ok_or_else(|| EngineError::UnknownPhase {
                token: token.to_string(),
            })
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Veg,
    Flower,
    PostHarvest,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Veg, Category::Flower, Category::PostHarvest];

    pub const fn phases(self) -> &'static [Phase] {
        match self {
            Category::Veg => &[Phase::EarlyVeg, Phase::MidLateVeg],
            Category::Flower => &[Phase::EarlyFlower, Phase::MidLateFlower, Phase::Flushing],
            Category::PostHarvest => &[Phase::Drying, Phase::Curing],
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Veg => "veg",
            Category::Flower => "flower",
            Category::PostHarvest => "post_harvest",
        }
    }
}

// ---------------------------------------------------------------------------
// Token-level contract
// ---------------------------------------------------------------------------

pub fn label_of(phase: Phase) -> &'static str {
    phase.label()
}

pub fn category_of(phase: Phase) -> Category {
    phase.category()
}

/// Rewrite a stored token into the current vocabulary.
pub fn migrate(token: &str) -> Result<Phase> {
    token.parse::<Phase>().map(Phase::current)
}

// ===========================================================================
// Tests
// ===========================================================================
