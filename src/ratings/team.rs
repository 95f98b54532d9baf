//! In-season team form
//!
//! Per-game means over a team's earlier games in the same season, taken
//! fresh for every date on which the team plays.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate::{AttributionStats, TeamGame};
use crate::{Season, TeamCode};

/// One team's average line entering a given date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub team: TeamCode,
    pub season: Season,
    pub date: NaiveDate,
    /// Number of earlier games the means cover
    pub games: u32,
    pub for_mean: AttributionStats,
    pub against_mean: AttributionStats,
}

/// Compute each team's per-game means for every date it plays on, from
/// its earlier games in the same season. The first date in the data and
/// teams without an earlier game produce no row.
pub fn team_inseason_ratings(team_games: &[TeamGame]) -> Vec<TeamRating> {
    let dates: BTreeSet<NaiveDate> = team_games.iter().map(|tg| tg.date).collect();

    let mut out = Vec::new();
    for &date in dates.iter().skip(1) {
        let today: Vec<&TeamGame> = team_games.iter().filter(|tg| tg.date == date).collect();
        let Some(season) = today.iter().map(|tg| tg.season).max() else {
            continue;
        };
        let teams: BTreeSet<&TeamCode> = today.iter().map(|tg| &tg.team).collect();

        let mut sums: BTreeMap<&TeamCode, (u32, AttributionStats, AttributionStats)> =
            BTreeMap::new();
        for tg in team_games {
            if tg.date >= date || tg.season != season || !teams.contains(&tg.team) {
                continue;
            }
            let entry = sums.entry(&tg.team).or_default();
            entry.0 += 1;
            entry.1.merge(&tg.stats_for);
            entry.2.merge(&tg.stats_against);
        }

        for (team, (games, for_sum, against_sum)) in sums {
            let n = f64::from(games);
            out.push(TeamRating {
                team: team.clone(),
                season,
                date,
                games,
                for_mean: for_sum.scaled(1.0 / n),
                against_mean: against_sum.scaled(1.0 / n),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GameId;
    use assert_approx_eq::assert_approx_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn make_team_game(
        game: i64,
        day: u32,
        season: u16,
        team: &str,
        opponent: &str,
        goals_for: f64,
    ) -> TeamGame {
        let mut stats_for = AttributionStats::default();
        stats_for.raw.all.goals = goals_for;
        TeamGame {
            team: TeamCode::new(team),
            opponent: TeamCode::new(opponent),
            game_id: GameId(game),
            date: date(2018, 10, day),
            season: Season(season),
            is_home: true,
            stats_for,
            stats_against: AttributionStats::default(),
            goals_for: goals_for as u32,
            goals_against: 0,
            shootout_goals_for: 0,
            shootout_goals_against: 0,
            penalties: 0.0,
            penalties_drawn: 0.0,
            starting_goalie: None,
            win: true,
            playoffs: false,
        }
    }

    #[test]
    fn test_means_cover_prior_games_only() {
        let games = vec![
            make_team_game(1, 3, 2018, "TOR", "MTL", 4.0),
            make_team_game(2, 5, 2018, "TOR", "BOS", 2.0),
            make_team_game(3, 8, 2018, "TOR", "NYR", 5.0),
        ];
        let ratings = team_inseason_ratings(&games);

        let oct5 = ratings
            .iter()
            .find(|r| r.date == date(2018, 10, 5))
            .unwrap();
        assert_eq!(oct5.games, 1);
        assert_approx_eq!(oct5.for_mean.raw.all.goals, 4.0);

        let oct8 = ratings
            .iter()
            .find(|r| r.date == date(2018, 10, 8))
            .unwrap();
        assert_eq!(oct8.games, 2);
        assert_approx_eq!(oct8.for_mean.raw.all.goals, 3.0);
    }

    #[test]
    fn test_first_date_and_debuting_teams_have_no_row() {
        let games = vec![
            make_team_game(1, 3, 2018, "TOR", "MTL", 4.0),
            make_team_game(2, 5, 2018, "BOS", "NYR", 2.0),
        ];
        let ratings = team_inseason_ratings(&games);
        // BOS plays on the 5th with no earlier games, TOR does not play
        assert!(ratings.is_empty());
    }

    #[test]
    fn test_means_do_not_cross_seasons() {
        let mut last_year = make_team_game(1, 3, 2017, "TOR", "MTL", 6.0);
        last_year.date = date(2017, 10, 3);
        let games = vec![
            last_year,
            make_team_game(2, 3, 2018, "TOR", "MTL", 2.0),
            make_team_game(3, 5, 2018, "TOR", "BOS", 4.0),
        ];
        let ratings = team_inseason_ratings(&games);

        let oct5 = ratings
            .iter()
            .find(|r| r.date == date(2018, 10, 5))
            .unwrap();
        assert_eq!(oct5.games, 1);
        assert_approx_eq!(oct5.for_mean.raw.all.goals, 2.0);
    }
}
