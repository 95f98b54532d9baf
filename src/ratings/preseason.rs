//! Preseason priors and projection blending
//!
//! Early-season rating samples are noisy, so projections mix the observed
//! in-season rating with a preseason prior. The in-season share grows as
//! `tanh((games - 1) / k)` where k is fitted per position and context;
//! players with no history (rookies, first team game of a season) get the
//! prior outright.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ratings::inseason::PlayerRating;
use crate::{Position, Result};

/// A prior value and the blend horizon that phases it out
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub value: f64,
    pub blend_games: f64,
}

/// Priors for each skater rating context
#[derive(Debug, Clone, Copy)]
pub struct SkaterPriors {
    pub gc60_5v5: Prior,
    pub gp60_5v5: Prior,
    pub gc60_pp: Prior,
    pub gp60_pk: Prior,
    pub gi60_pens: Prior,
}

pub const FORWARD_PRIORS: SkaterPriors = SkaterPriors {
    gc60_5v5: Prior { value: 0.0179, blend_games: 115.0 },
    gp60_5v5: Prior { value: -0.0127, blend_games: 148.0 },
    gc60_pp: Prior { value: -0.1067, blend_games: 235.0 },
    gp60_pk: Prior { value: -0.5281, blend_games: 121.0 },
    gi60_pens: Prior { value: -0.0048, blend_games: 151.0 },
};

pub const DEFENSE_PRIORS: SkaterPriors = SkaterPriors {
    gc60_5v5: Prior { value: -0.0005, blend_games: 108.0 },
    gp60_5v5: Prior { value: 0.0337, blend_games: 125.0 },
    gc60_pp: Prior { value: -0.1030, blend_games: 194.0 },
    gp60_pk: Prior { value: -0.0717, blend_games: 75.0 },
    gi60_pens: Prior { value: -0.0267, blend_games: 90.0 },
};

pub const GOALIE_PRIOR: Prior = Prior { value: -0.0147, blend_games: 39.0 };

pub fn skater_priors(position: Position) -> SkaterPriors {
    match position {
        Position::Defense => DEFENSE_PRIORS,
        _ => FORWARD_PRIORS,
    }
}

/// Blend an observed rating with its prior for a team's `game_num`-th game
/// of the season. An absent observation leaves the prior in full.
pub fn blend(prior: Prior, game_num: u32, observed: Option<f64>) -> f64 {
    if game_num <= 1 {
        return prior.value;
    }
    let Some(observed) = observed else {
        return prior.value;
    };
    let weight = (f64::from(game_num - 1) / prior.blend_games).tanh();
    weight * observed + (1.0 - weight) * prior.value
}

/// Projected per-60 impacts for one player entering a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkaterProjection {
    pub gc60_5v5: f64,
    pub gp60_5v5: f64,
    pub gc60_pp: f64,
    pub gp60_pk: f64,
    pub gi60_pens: f64,
}

pub fn project_skater(
    position: Position,
    game_num: u32,
    rating: Option<&PlayerRating>,
) -> SkaterProjection {
    let p = skater_priors(position);
    SkaterProjection {
        gc60_5v5: blend(p.gc60_5v5, game_num, rating.and_then(|r| r.gc60_5v5)),
        gp60_5v5: blend(p.gp60_5v5, game_num, rating.and_then(|r| r.gp60_5v5)),
        gc60_pp: blend(p.gc60_pp, game_num, rating.and_then(|r| r.gc60_pp)),
        gp60_pk: blend(p.gp60_pk, game_num, rating.and_then(|r| r.gp60_pk)),
        gi60_pens: blend(p.gi60_pens, game_num, rating.and_then(|r| r.gi60_pens)),
    }
}

pub fn project_goalie(game_num: u32, rating: Option<&PlayerRating>) -> f64 {
    blend(GOALIE_PRIOR, game_num, rating.and_then(|r| r.gi60))
}

/// Team-level priors, keyed by metric name, loaded from a JSON config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamPriors {
    pub metrics: HashMap<String, Prior>,
}

impl TeamPriors {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TeamPriors> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Project one team metric; `None` when the metric has no configured
    /// prior, so callers can skip it rather than invent a value.
    pub fn project(&self, metric: &str, game_num: u32, prev_mean: Option<f64>) -> Option<f64> {
        self.metrics
            .get(metric)
            .map(|prior| blend(*prior, game_num, prev_mean))
    }
}
