//! Score and venue adjustment factors
//!
//! Shot metrics are deflated or inflated by empirical factors keyed on the
//! game situation, so teams protecting a lead are not punished for shelling.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{Result, Strength, StrengthBucket};

/// Multiplicative factors for one game situation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Adjustment {
    pub goals: f64,
    pub shots: f64,
    pub attempts: f64,
    pub unblocked: f64,
    pub xg: f64,
}

impl Adjustment {
    pub const NEUTRAL: Adjustment = Adjustment {
        goals: 1.0,
        shots: 1.0,
        attempts: 1.0,
        unblocked: 1.0,
        xg: 1.0,
    };
}

/// One row of the factor table as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AdjustmentEntry {
    pub(crate) strength: String,
    pub(crate) home: bool,
    pub(crate) score_diff: i32,
    pub(crate) period: u8,
    #[serde(flatten)]
    pub(crate) factors: Adjustment,
}

/// Factor lookup keyed by (strength group, venue, score state, period)
#[derive(Debug, Clone, Default)]
pub struct AdjustmentTable {
    map: HashMap<(String, bool, i32, u8), Adjustment>,
}

impl AdjustmentTable {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<AdjustmentEntry> = serde_json::from_str(&content)?;
        Ok(Self::from_entries(entries))
    }

    pub(crate) fn from_entries(entries: Vec<AdjustmentEntry>) -> Self {
        let mut map = HashMap::new();
        for e in entries {
            map.insert((e.strength, e.home, e.score_diff, e.period), e.factors);
        }
        AdjustmentTable { map }
    }

    /// Look up the factors for an event, clipping the score state and
    /// period into the table's domain. Unknown situations are neutral.
    ///
    /// `score_diff` is always the home goal differential; the acting
    /// side enters only through the `home` flag.
    pub fn lookup(
        &self,
        strength: Strength,
        empty_net: bool,
        home: bool,
        score_diff: i32,
        period: u8,
    ) -> Adjustment {
        let key = strength_key(strength, empty_net);
        let five = key == "5x5";

        let clip = if five { 3 } else { 1 };
        let diff = score_diff.clamp(-clip, clip);

        let mut p = period.min(4);
        if p == 2 {
            p = 1;
        }
        if !five && p != 3 {
            p = 1;
        }
        // tied even-strength overtime situations are too thin to fit
        // per period, so they share the period 1 row
        if (key == "4x4" || key == "3x3") && diff == 0 {
            p = 1;
        }

        match self.map.get(&(key.clone(), home, diff, p)) {
            Some(adj) => *adj,
            None => {
                debug!("no adjustment for {} home={} diff={} period={}", key, home, diff, p);
                Adjustment::NEUTRAL
            }
        }
    }
}

/// Strength group from the acting team's point of view
fn strength_key(strength: Strength, empty_net: bool) -> String {
    if empty_net {
        return "EN".to_string();
    }
    match strength.bucket() {
        StrengthBucket::FiveOnFive => "5x5".to_string(),
        StrengthBucket::PowerPlay => "PP".to_string(),
        StrengthBucket::PenaltyKill => "PK".to_string(),
        StrengthBucket::Other => strength.to_string(),
    }
}
