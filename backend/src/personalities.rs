//! Personality registry
//!
//! A personality bundles the legacy engine's tuning parameters with an
//! opening book and a think-time policy. Definitions are read once from a
//! JSON object keyed by name:
//!
//! ```json
//! {
//!   "Wizard": {
//!     "name": "Wizard",
//!     "ponder": "normal",
//!     "book": "Strong.bin",
//!     "rating": 2800,
//!     "out": { "opp": "100", "cfd": "-20", "tts": "16777216" }
//!   }
//! }
//! ```
//!
//! The definitions file stores every parameter as a string, so numbers are
//! accepted in either form. Missing parameters default to zero.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::config::ClockTiers;
use crate::error::{DispatchError, DispatchResult};

/// Rating from which the grandmaster think time applies
pub const GRANDMASTER_RATING: i32 = 2700;

/// Plies played before a personality will consider a draw offer
pub const DRAW_MIN_MOVES: usize = 30;

/// Evaluation and search parameters understood by the legacy engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningParams {
    #[serde(deserialize_with = "lenient_i64")]
    pub opp: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub opn: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub opb: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub opr: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub opq: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub myp: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub myn: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub myb: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub myr: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub myq: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub mycc: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub mymob: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub myks: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub mypp: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub mypw: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub opcc: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub opmob: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub opks: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub oppp: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub oppw: i64,
    /// Contempt for draw
    #[serde(deserialize_with = "lenient_i64")]
    pub cfd: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub sop: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub avd: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub rnd: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub sel: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub md: i64,
    /// Transposition table size
    #[serde(deserialize_with = "lenient_i64")]
    pub tts: i64,
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Text(s) if s.trim().is_empty() => Ok(0),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected a number, got {s:?}"))),
    }
}

/// Named automated opponent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Personality {
    pub name: String,
    #[serde(rename = "out", alias = "vals", default)]
    pub params: TuningParams,
    /// Pondering mode; `easy` selects the short think time
    #[serde(default)]
    pub ponder: String,
    /// Book file name inside the book directory
    pub book: String,
    #[serde(default)]
    pub rating: i32,
}

/// Read-only name -> personality map with the think-time policy
#[derive(Debug, Clone, Default)]
pub struct PersonalityRegistry {
    personalities: HashMap<String, Personality>,
    clock: ClockTiers,
}

impl PersonalityRegistry {
    pub fn new(personalities: HashMap<String, Personality>, clock: ClockTiers) -> Self {
        Self {
            personalities,
            clock,
        }
    }

    /// Parse a definitions document
    pub fn from_json(json: &str, clock: ClockTiers) -> DispatchResult<Self> {
        let personalities: HashMap<String, Personality> = serde_json::from_str(json)?;
        Ok(Self::new(personalities, clock))
    }

    /// Load the definitions file at `path`
    pub fn load(path: &Path, clock: ClockTiers) -> DispatchResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| DispatchError::Config {
            reason: format!("cannot read personalities {}: {e}", path.display()),
        })?;
        let registry = Self::from_json(&json, clock)?;
        let mut names: Vec<&str> = registry.names().collect();
        names.sort_unstable();
        tracing::info!(
            path = %path.display(),
            count = registry.len(),
            names = %names.join(","),
            "loaded personalities"
        );
        Ok(registry)
    }

    pub fn resolve(&self, name: &str) -> Option<&Personality> {
        self.personalities.get(name)
    }

    /// Like [`resolve`](Self::resolve), as an error when unknown
    pub fn require(&self, name: &str) -> DispatchResult<&Personality> {
        self.resolve(name)
            .ok_or_else(|| DispatchError::PersonalityNotFound {
                name: name.to_string(),
            })
    }

    /// Think time for `personality`
    pub fn clock_budget(&self, personality: &Personality) -> Duration {
        if personality.ponder == "easy" {
            self.clock.easy
        } else if personality.rating >= GRANDMASTER_RATING {
            self.clock.grandmaster
        } else {
            self.clock.standard
        }
    }

    pub fn len(&self) -> usize {
        self.personalities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personalities.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.personalities.keys().map(String::as_str)
    }
}

/// Whether a personality offered a draw would take it
///
/// Only after more than thirty plies, and only when the position looks
/// worse than the personality's contempt for a draw.
pub fn accepts_draw(eval: i64, move_count: usize, contempt_for_draw: i64) -> bool {
    move_count > DRAW_MIN_MOVES && eval + contempt_for_draw < 0
}
