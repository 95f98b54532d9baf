//! Team Elo ratings
//!
//! A fold over the full game history in strict chronological order. Each
//! game emits the rating both teams carried into it; the updated ratings
//! apply from their next game onward.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate::TeamGame;
use crate::{GameId, PuckError, Result, Season, TeamCode};

/// Elo configuration
#[derive(Debug, Clone)]
pub struct EloConfig {
    /// Starting rating for new teams
    pub initial_rating: f64,
    /// Base K-factor per game
    pub k_factor: f64,
    /// Share of the rating regressed away at a season boundary
    pub regression_weight: f64,
    /// Rating regressed toward at a season boundary
    pub regression_target: f64,
    pub margin_slope: f64,
    pub margin_intercept: f64,
    /// Dampening numerator for a favorite win
    pub damp: f64,
    pub damp_slope: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        EloConfig {
            initial_rating: 1500.0,
            k_factor: 6.0,
            regression_weight: 0.3,
            regression_target: 1505.0,
            margin_slope: 0.6686,
            margin_intercept: 0.8048,
            damp: 2.05,
            damp_slope: 0.001,
        }
    }
}

/// One completed game, as the Elo fold consumes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EloGame {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: Season,
    pub home_team: TeamCode,
    pub away_team: TeamCode,
    /// Goals through overtime; a shootout decides the win flag, not the margin
    pub home_goals: u32,
    pub away_goals: u32,
    pub home_win: bool,
}

impl EloGame {
    /// Build the chronologically sorted game list from home-side team rows.
    pub fn from_team_games(team_games: &[TeamGame]) -> Vec<EloGame> {
        let mut games: Vec<EloGame> = team_games
            .iter()
            .filter(|tg| tg.is_home)
            .map(|tg| EloGame {
                game_id: tg.game_id,
                date: tg.date,
                season: tg.season,
                home_team: tg.team.clone(),
                away_team: tg.opponent.clone(),
                home_goals: tg.goals_for,
                away_goals: tg.goals_against,
                home_win: tg.win,
            })
            .collect();
        games.sort_by(|a, b| (a.date, a.game_id).cmp(&(b.date, b.game_id)));
        games
    }
}

/// Rating a team carried into one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EloSnapshot {
    pub team: TeamCode,
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: Season,
    pub rating: f64,
}

/// Elo rating state machine
pub struct EloRatings {
    config: EloConfig,
    ratings: HashMap<TeamCode, f64>,
    last_season: HashMap<TeamCode, Season>,
    seen: HashSet<(TeamCode, GameId)>,
    cursor: Option<NaiveDate>,
}

impl Default for EloRatings {
    fn default() -> Self {
        Self::new(EloConfig::default())
    }
}

impl EloRatings {
    pub fn new(config: EloConfig) -> Self {
        EloRatings {
            config,
            ratings: HashMap::new(),
            last_season: HashMap::new(),
            seen: HashSet::new(),
            cursor: None,
        }
    }

    /// Current rating for a team (initial if unknown)
    pub fn rating(&self, team: &TeamCode) -> f64 {
        *self
            .ratings
            .get(team)
            .unwrap_or(&self.config.initial_rating)
    }

    /// Probability that `team` beats `opponent` at current ratings
    pub fn win_probability(&self, team: &TeamCode, opponent: &TeamCode) -> f64 {
        let diff = self.rating(opponent) - self.rating(team);
        1.0 / (10.0_f64.powf(diff / 400.0) + 1.0)
    }

    /// Fold the games into the rating state, emitting one snapshot per
    /// team per game with the rating entering that game.
    ///
    /// Games must arrive in (date, game id) order; an out-of-order or
    /// duplicate game corrupts every later rating and is a hard error.
    pub fn run(&mut self, games: &[EloGame]) -> Result<Vec<EloSnapshot>> {
        let mut snapshots = Vec::with_capacity(games.len() * 2);

        for game in games {
            if let Some(cursor) = self.cursor {
                // games on the same date touch disjoint teams and commute
                if game.date < cursor {
                    return Err(PuckError::OutOfOrder {
                        game: game.game_id,
                        date: game.date,
                    });
                }
            }
            self.cursor = Some(game.date);
            for team in [&game.home_team, &game.away_team] {
                if !self.seen.insert((team.clone(), game.game_id)) {
                    return Err(PuckError::DuplicateGame {
                        game: game.game_id,
                        team: team.clone(),
                    });
                }
            }

            let home = self.entering_rating(&game.home_team, game.season);
            let away = self.entering_rating(&game.away_team, game.season);
            for (team, rating) in [(&game.home_team, home), (&game.away_team, away)] {
                snapshots.push(EloSnapshot {
                    team: team.clone(),
                    game_id: game.game_id,
                    date: game.date,
                    season: game.season,
                    rating,
                });
            }

            let (delta_home, delta_away) = deltas(
                &self.config,
                home,
                away,
                game.home_win,
                game.home_goals,
                game.away_goals,
            );
            self.ratings.insert(game.home_team.clone(), home + delta_home);
            self.ratings.insert(game.away_team.clone(), away + delta_away);
        }

        Ok(snapshots)
    }

    /// Rating carried into a game, regressed toward the mean when this is
    /// the team's first game of a new season.
    fn entering_rating(&mut self, team: &TeamCode, season: Season) -> f64 {
        let mut rating = self.rating(team);
        match self.last_season.get(team) {
            Some(&last) if last != season => {
                rating = rating * (1.0 - self.config.regression_weight)
                    + self.config.regression_target * self.config.regression_weight;
            }
            _ => {}
        }
        self.last_season.insert(team.clone(), season);
        self.ratings.insert(team.clone(), rating);
        rating
    }
}

fn deltas(
    config: &EloConfig,
    home: f64,
    away: f64,
    home_win: bool,
    home_goals: u32,
    away_goals: u32,
) -> (f64, f64) {
    let p_home = 1.0 / (10.0_f64.powf((away - home) / 400.0) + 1.0);
    let p_away = 1.0 - p_home;

    let goal_diff = home_goals.abs_diff(away_goals).max(1) as f64;
    let margin = config.margin_slope * goal_diff.ln() + config.margin_intercept;

    // a favorite win moves ratings less the larger the gap already is
    let damp = config.damp / ((home - away).abs() * config.damp_slope + config.damp);
    let (damp_home, damp_away) = if home > away && home_win {
        (damp, 1.0)
    } else if away > home && !home_win {
        (1.0, damp)
    } else {
        (1.0, 1.0)
    };

    let outcome_home = if home_win { 1.0 } else { 0.0 };
    let delta_home = config.k_factor * margin * damp_home * (outcome_home - p_home);
    let delta_away = config.k_factor * margin * damp_away * ((1.0 - outcome_home) - p_away);
    (delta_home, delta_away)
}
