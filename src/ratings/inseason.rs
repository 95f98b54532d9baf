//! In-season player ratings
//!
//! For every date in a season after the first, rate each player from their
//! games strictly before that date. On-ice rates are compared against what
//! teammate and opponent quality predicted (via a least squares fit over
//! shared ice time) and against the league average, then folded together
//! with individual shot contributions into per-60 goal impact numbers.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::aggregate::{AssistStats, AttributionStats, PlayerGame, ZoneStarts};
use crate::ratings::regression::{fit_ols, LinearModel};
use crate::shifts::{OverlapRow, Toi};
use crate::{GameId, PlayerId, Position, Season, StrengthBucket};

/// Zone start rate used for prediction when a player has no observed starts
const DEFAULT_ZONE_RATE: f64 = 0.4;

/// One player's rating line entering a given date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub player: PlayerId,
    pub season: Season,
    pub date: NaiveDate,
    pub position: Position,
    pub toi: f64,
    pub toi_5v5: f64,
    pub toi_pp: f64,
    pub toi_pk: f64,
    /// Goals created per 60 at five on five
    pub gc60_5v5: Option<f64>,
    /// Goals prevented per 60 at five on five
    pub gp60_5v5: Option<f64>,
    pub gc60_pp: Option<f64>,
    pub gp60_pk: Option<f64>,
    /// Goal impact per 60 from penalties taken and drawn
    pub gi60_pens: Option<f64>,
    /// Goal impact per 60 in net (goalies only)
    pub gi60: Option<f64>,
}

/// Career-to-date totals within one season, prior to a cutoff date
#[derive(Debug, Clone, Default)]
struct Totals {
    toi: Toi,
    on_ice_for: AttributionStats,
    on_ice_against: AttributionStats,
    individual: AttributionStats,
    assists: AssistStats,
    penalties: f64,
    penalties_drawn: f64,
    zone_starts: ZoneStarts,
}

impl Totals {
    fn absorb(&mut self, pg: &PlayerGame) {
        self.toi.merge(&pg.toi);
        self.on_ice_for.merge(&pg.on_ice_for);
        self.on_ice_against.merge(&pg.on_ice_against);
        self.individual.merge(&pg.individual);
        self.assists.merge(&pg.assists);
        self.penalties += pg.penalties;
        self.penalties_drawn += pg.penalties_drawn;
        self.zone_starts.merge(&pg.zone_starts);
    }

    fn ozone_rate(&self) -> Option<f64> {
        let total = self.zone_starts.total();
        (total > 0.0).then(|| self.zone_starts.off / total)
    }

    fn dzone_rate(&self) -> Option<f64> {
        let total = self.zone_starts.total();
        (total > 0.0).then(|| self.zone_starts.def / total)
    }
}

/// Summed shared ice time with one other player in one context
#[derive(Debug, Clone)]
struct Exposure {
    other: PlayerId,
    bucket: StrengthBucket,
    same_team: bool,
    seconds: f64,
}

// Each on-ice metric is a weighted blend of goal, shot, and expected goal
// rates. The numerator and denominator are kept apart so league averages
// can be taken as ratios of sums, which weights players by ice time.

fn metric_o_parts(t: &Totals, position: Position) -> (f64, f64) {
    match position {
        Position::Forward => (
            3600.0
                * (0.163 * t.on_ice_for.raw.ev5.goals
                    + 0.185 * 0.091286 * t.on_ice_for.adjusted.ev5.shots
                    + 0.262 * t.on_ice_for.raw.ev5.xg_flurry),
            t.toi.ev5 * (0.163 + 0.185 + 0.262),
        ),
        _ => (
            3600.0
                * (0.064 * t.on_ice_for.adjusted.ev5.goals
                    + 0.132 * 0.049399 * t.on_ice_for.adjusted.ev5.attempts
                    + 0.160 * t.on_ice_for.raw.ev5.xg),
            t.toi.ev5 * (0.064 + 0.132 + 0.160),
        ),
    }
}

fn metric_d_parts(t: &Totals, position: Position) -> (f64, f64) {
    match position {
        Position::Forward => (
            3600.0
                * (0.031 * t.on_ice_against.raw.ev5.goals
                    + 0.140 * 0.065956 * t.on_ice_against.adjusted.ev5.unblocked
                    + 0.175 * t.on_ice_against.adjusted.ev5.xg_flurry),
            t.toi.ev5 * (0.031 + 0.140 + 0.175),
        ),
        _ => (
            3600.0
                * (0.041 * t.on_ice_against.raw.ev5.goals
                    + 0.172 * 0.065956 * t.on_ice_against.adjusted.ev5.unblocked
                    + 0.216 * t.on_ice_against.adjusted.ev5.xg),
            t.toi.ev5 * (0.041 + 0.172 + 0.216),
        ),
    }
}

fn metric_pp_parts(t: &Totals, position: Position) -> (f64, f64) {
    match position {
        Position::Forward => (
            3600.0
                * (0.154 * t.on_ice_for.adjusted.pp.goals
                    + 0.268 * 0.065956 * t.on_ice_for.raw.pp.unblocked
                    + 0.293 * t.on_ice_for.raw.pp.xg_flurry),
            t.toi.pp * (0.154 + 0.268 + 0.293),
        ),
        _ => (
            3600.0
                * (0.104 * t.on_ice_for.adjusted.pp.goals
                    + 0.249 * 0.065956 * t.on_ice_for.raw.pp.unblocked
                    + 0.215 * t.on_ice_for.raw.pp.xg_flurry),
            t.toi.pp * (0.104 + 0.249 + 0.215),
        ),
    }
}

fn metric_pk_parts(t: &Totals, position: Position) -> (f64, f64) {
    match position {
        Position::Forward => (
            3600.0
                * (0.019 * t.on_ice_against.adjusted.pk.goals
                    + 0.155 * 0.049399 * t.on_ice_against.raw.pk.attempts
                    + 0.097 * t.on_ice_against.adjusted.pk.xg_flurry),
            t.toi.pk * (0.019 + 0.155 + 0.097),
        ),
        _ => (
            3600.0
                * (0.017 * t.on_ice_against.raw.pk.goals
                    + 0.166 * 0.049399 * t.on_ice_against.raw.pk.attempts
                    + 0.065 * t.on_ice_against.raw.pk.xg_flurry),
            t.toi.pk * (0.017 + 0.166 + 0.065),
        ),
    }
}

fn ratio((num, den): (f64, f64)) -> Option<f64> {
    (den > 0.0).then(|| num / den)
}

fn league_mean(
    rows: &[(PlayerId, &Totals)],
    position: Position,
    parts: fn(&Totals, Position) -> (f64, f64),
) -> Option<f64> {
    let (num, den) = rows.iter().fold((0.0, 0.0), |(n, d), (_, t)| {
        let (a, b) = parts(t, position);
        (n + a, d + b)
    });
    ratio((num, den))
}

/// Individual shot contribution weights for one position and context
struct IndivWeights {
    goals: f64,
    primary: f64,
    secondary: f64,
    attempts: f64,
    xg: f64,
}

impl IndivWeights {
    fn sum(&self) -> f64 {
        self.goals + self.primary + self.secondary + self.attempts + self.xg
    }
}

fn indiv_contrib_5v5(t: &Totals, position: Position) -> Option<f64> {
    let w = match position {
        Position::Forward => IndivWeights {
            goals: 0.142,
            primary: 0.114,
            secondary: 0.036,
            attempts: 0.559,
            xg: 0.374,
        },
        _ => IndivWeights {
            goals: 0.070,
            primary: 0.050,
            secondary: 0.021,
            attempts: 0.502,
            xg: 0.386,
        },
    };
    let num = w.goals * t.individual.raw.ev5.goals
        + w.primary * t.assists.ev5.primary
        + w.secondary * t.assists.ev5.secondary
        + w.attempts * 0.049399 * t.individual.raw.ev5.attempts
        + w.xg * t.individual.raw.ev5.xg_flurry;
    ratio((num * 3600.0, t.toi.ev5 * w.sum()))
}

fn indiv_contrib_pp(t: &Totals, position: Position) -> Option<f64> {
    // defensemen get credit on value-weighted goals and primary assists,
    // and on plain rather than flurry-discounted expected goals
    let (w, num) = match position {
        Position::Forward => {
            let w = IndivWeights {
                goals: 0.072,
                primary: 0.160,
                secondary: 0.091,
                attempts: 0.549,
                xg: 0.315,
            };
            let num = w.goals * t.individual.raw.pp.goals
                + w.primary * t.assists.pp.primary
                + w.secondary * t.assists.pp.secondary
                + w.attempts * 0.049399 * t.individual.raw.pp.attempts
                + w.xg * t.individual.raw.pp.xg_flurry;
            (w, num)
        }
        _ => {
            let w = IndivWeights {
                goals: 0.021,
                primary: 0.091,
                secondary: 0.033,
                attempts: 0.354,
                xg: 0.289,
            };
            let num = w.goals * t.individual.adjusted.pp.goals
                + w.primary * t.assists.pp.primary_adj
                + w.secondary * t.assists.pp.secondary
                + w.attempts * 0.049399 * t.individual.raw.pp.attempts
                + w.xg * t.individual.raw.pp.xg;
            (w, num)
        }
    };
    ratio((num * 3600.0, t.toi.pp * w.sum()))
}

/// Compute rating lines for every date in every season past the first.
///
/// Playoff games are excluded throughout; players only appear once they
/// have five on five ice time on the books.
pub fn player_inseason_ratings(
    player_games: &[PlayerGame],
    overlaps: &[OverlapRow],
    positions: &HashMap<(PlayerId, Season), Position>,
) -> Vec<PlayerRating> {
    let mut by_season: BTreeMap<Season, Vec<&PlayerGame>> = BTreeMap::new();
    for pg in player_games.iter().filter(|pg| !pg.playoffs) {
        by_season.entry(pg.season).or_default().push(pg);
    }

    let mut out = Vec::new();
    for (&season, games) in &by_season {
        let dates: BTreeSet<NaiveDate> = games.iter().map(|pg| pg.date).collect();
        for &date in dates.iter().skip(1) {
            let prior: Vec<&&PlayerGame> = games.iter().filter(|pg| pg.date < date).collect();
            let prior_games: HashSet<GameId> = prior.iter().map(|pg| pg.game_id).collect();

            let mut totals: HashMap<PlayerId, Totals> = HashMap::new();
            for pg in &prior {
                totals.entry(pg.player).or_default().absorb(pg);
            }
            totals.retain(|_, t| t.toi.ev5 > 0.0);

            let mut exposures: HashMap<PlayerId, Vec<Exposure>> = HashMap::new();
            let mut summed: HashMap<(PlayerId, PlayerId, StrengthBucket, bool), f64> =
                HashMap::new();
            for row in overlaps {
                if !prior_games.contains(&row.game_id)
                    || !totals.contains_key(&row.player)
                    || !totals.contains_key(&row.other)
                {
                    continue;
                }
                *summed
                    .entry((row.player, row.other, row.bucket, row.same_team))
                    .or_insert(0.0) += row.seconds;
            }
            for ((player, other, bucket, same_team), seconds) in summed {
                exposures.entry(player).or_default().push(Exposure {
                    other,
                    bucket,
                    same_team,
                    seconds,
                });
            }

            out.extend(date_ratings(season, date, &totals, &exposures, positions));
        }
    }

    out.sort_by_key(|r| (r.season, r.date, r.player));
    out
}

fn date_ratings(
    season: Season,
    date: NaiveDate,
    totals: &HashMap<PlayerId, Totals>,
    exposures: &HashMap<PlayerId, Vec<Exposure>>,
    positions: &HashMap<(PlayerId, Season), Position>,
) -> Vec<PlayerRating> {
    let pos_of = |player: PlayerId| positions.get(&(player, season)).copied();

    let mut forwards: Vec<(PlayerId, &Totals)> = Vec::new();
    let mut defense: Vec<(PlayerId, &Totals)> = Vec::new();
    let mut goalies: Vec<(PlayerId, &Totals)> = Vec::new();
    for (&player, t) in totals {
        match pos_of(player) {
            Some(Position::Forward) => forwards.push((player, t)),
            Some(Position::Defense) => defense.push((player, t)),
            Some(Position::Goalie) => goalies.push((player, t)),
            None => debug!("no position on record for player {player}, skipping"),
        }
    }
    forwards.sort_by_key(|(p, _)| *p);
    defense.sort_by_key(|(p, _)| *p);
    goalies.sort_by_key(|(p, _)| *p);

    let mut ratings: BTreeMap<PlayerId, PlayerRating> = BTreeMap::new();
    for (player, t) in forwards
        .iter()
        .chain(defense.iter())
        .chain(goalies.iter())
    {
        ratings.insert(
            *player,
            PlayerRating {
                player: *player,
                season,
                date,
                position: pos_of(*player).unwrap_or(Position::Forward),
                toi: t.toi.total,
                toi_5v5: t.toi.ev5,
                toi_pp: t.toi.pp,
                toi_pk: t.toi.pk,
                gc60_5v5: None,
                gp60_5v5: None,
                gc60_pp: None,
                gp60_pk: None,
                gi60_pens: None,
                gi60: None,
            },
        );
    }

    let pen_val = penalty_value(totals);
    for (rows, position) in [(&forwards, Position::Forward), (&defense, Position::Defense)] {
        five_on_five_block(rows, position, totals, exposures, pos_of, &mut ratings);
        power_play_block(rows, position, totals, exposures, pos_of, &mut ratings);
        penalty_kill_block(rows, position, totals, exposures, pos_of, &mut ratings);
        if let Some(pen_val) = pen_val {
            penalty_block(rows, position, pen_val, &mut ratings);
        }
    }
    goalie_block(&goalies, &mut ratings);

    ratings.into_values().collect()
}

/// Expected swing of one minor penalty in goals, from league wide special
/// teams scoring rates.
fn penalty_value(totals: &HashMap<PlayerId, Totals>) -> Option<f64> {
    let (mut goals_pp, mut toi_pp, mut goals_pk, mut toi_pk) = (0.0, 0.0, 0.0, 0.0);
    for t in totals.values() {
        goals_pp += t.on_ice_for.raw.pp.goals;
        toi_pp += t.toi.pp;
        goals_pk += t.on_ice_for.raw.pk.goals;
        toi_pk += t.toi.pk;
    }
    if toi_pp > 0.0 && toi_pk > 0.0 {
        Some((3600.0 * goals_pp / toi_pp - 3600.0 * goals_pk / toi_pk) * (2.0 / 60.0))
    } else {
        None
    }
}

fn five_on_five_block(
    rows: &[(PlayerId, &Totals)],
    position: Position,
    totals: &HashMap<PlayerId, Totals>,
    exposures: &HashMap<PlayerId, Vec<Exposure>>,
    pos_of: impl Fn(PlayerId) -> Option<Position>,
    ratings: &mut BTreeMap<PlayerId, PlayerRating>,
) {
    let mean_o = league_mean(rows, position, metric_o_parts);
    let mean_d = league_mean(rows, position, metric_d_parts);
    let (Some(mean_o), Some(mean_d)) = (mean_o, mean_d) else {
        return;
    };

    struct Row {
        player: PlayerId,
        ozone: Option<f64>,
        dzone: Option<f64>,
        metric_o: f64,
        metric_d: f64,
        team_o: f64,
        comp_o: f64,
        team_d: f64,
        comp_d: f64,
        indiv: f64,
        toi_5v5: f64,
    }

    let mut table: Vec<Row> = Vec::with_capacity(rows.len());
    for &(player, t) in rows {
        let (mut team_o, mut comp_o, mut team_d, mut comp_d) = (0.0, 0.0, 0.0, 0.0);
        for exp in exposures.get(&player).map(Vec::as_slice).unwrap_or(&[]) {
            if exp.bucket != StrengthBucket::FiveOnFive
                || pos_of(exp.other) == Some(Position::Goalie)
            {
                continue;
            }
            let Some(other) = totals.get(&exp.other) else {
                continue;
            };
            let other_pos = match pos_of(exp.other) {
                Some(p) => p,
                None => continue,
            };
            let o = ratio(metric_o_parts(other, other_pos)).unwrap_or(0.0);
            let d = ratio(metric_d_parts(other, other_pos)).unwrap_or(0.0);
            if exp.same_team {
                // four teammates share the ice with the rated player
                team_o += o * exp.seconds / (t.toi.ev5 * 4.0);
                team_d += d * exp.seconds / (t.toi.ev5 * 4.0);
            } else {
                // opposing defense drives offense faced, and vice versa
                comp_o += d * exp.seconds / (t.toi.ev5 * 5.0);
                comp_d += o * exp.seconds / (t.toi.ev5 * 5.0);
            }
        }
        table.push(Row {
            player,
            ozone: t.ozone_rate(),
            dzone: t.dzone_rate(),
            metric_o: ratio(metric_o_parts(t, position)).unwrap_or(0.0),
            metric_d: ratio(metric_d_parts(t, position)).unwrap_or(0.0),
            team_o,
            comp_o,
            team_d,
            comp_d,
            indiv: indiv_contrib_5v5(t, position).unwrap_or(0.0),
            toi_5v5: t.toi.ev5,
        });
    }

    let fit = |features: &dyn Fn(&Row) -> Option<Vec<f64>>,
               target: &dyn Fn(&Row) -> f64|
     -> Option<LinearModel> {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for row in &table {
            if let Some(x) = features(row) {
                xs.push(x);
                ys.push(target(row));
            }
        }
        fit_ols(&xs, &ys)
    };

    let model_o = fit(
        &|r| r.ozone.map(|z| vec![z, r.team_o, r.comp_o]),
        &|r| r.metric_o,
    );
    let model_d = fit(
        &|r| r.dzone.map(|z| vec![z, r.team_d, r.comp_d]),
        &|r| r.metric_d,
    );

    let toi_sum: f64 = table.iter().map(|r| r.toi_5v5).sum();
    let indiv_mean = if toi_sum > 0.0 {
        table.iter().map(|r| r.indiv * r.toi_5v5).sum::<f64>() / toi_sum
    } else {
        0.0
    };

    for row in &table {
        let Some(rating) = ratings.get_mut(&row.player) else {
            continue;
        };
        if let Some(model) = &model_o {
            let pred = model.predict(&[
                row.ozone.unwrap_or(DEFAULT_ZONE_RATE),
                row.team_o,
                row.comp_o,
            ]);
            let above_exp = row.metric_o - pred;
            let above_avg = row.metric_o - mean_o;
            rating.gc60_5v5 = Some((above_exp + above_avg + (row.indiv - indiv_mean)) / 3.0);
        }
        if let Some(model) = &model_d {
            let pred = model.predict(&[
                row.dzone.unwrap_or(DEFAULT_ZONE_RATE),
                row.team_d,
                row.comp_d,
            ]);
            let above_exp = row.metric_d - pred;
            let above_avg = row.metric_d - mean_d;
            // lower rates against are better
            rating.gp60_5v5 = Some((above_exp + above_avg) / -2.0);
        }
    }
}

fn power_play_block(
    rows: &[(PlayerId, &Totals)],
    position: Position,
    totals: &HashMap<PlayerId, Totals>,
    exposures: &HashMap<PlayerId, Vec<Exposure>>,
    pos_of: impl Fn(PlayerId) -> Option<Position>,
    ratings: &mut BTreeMap<PlayerId, PlayerRating>,
) {
    let Some(mean) = league_mean(rows, position, metric_pp_parts) else {
        return;
    };

    struct Row {
        player: PlayerId,
        metric: f64,
        team: f64,
        comp: f64,
        indiv: f64,
        toi_pp: f64,
    }

    let mut table: Vec<Row> = Vec::new();
    for &(player, t) in rows {
        if t.toi.pp <= 0.0 {
            continue;
        }
        let (mut team, mut comp, mut matched) = (0.0, 0.0, false);
        for exp in exposures.get(&player).map(Vec::as_slice).unwrap_or(&[]) {
            if exp.bucket != StrengthBucket::PowerPlay || exp.seconds <= 0.0 {
                continue;
            }
            let Some(other) = totals.get(&exp.other) else {
                continue;
            };
            let other_pos = match pos_of(exp.other) {
                Some(Position::Goalie) | None => continue,
                Some(p) => p,
            };
            if exp.same_team {
                if other.toi.pp <= 0.0 {
                    continue;
                }
                let m = ratio(metric_pp_parts(other, other_pos)).unwrap_or(0.0);
                team += m * exp.seconds / (t.toi.pp * 4.0);
            } else {
                if other.toi.pk <= 0.0 {
                    continue;
                }
                let m = ratio(metric_pk_parts(other, other_pos)).unwrap_or(0.0);
                comp += m * exp.seconds / (t.toi.pp * 4.0);
            }
            matched = true;
        }
        if !matched {
            continue;
        }
        table.push(Row {
            player,
            metric: ratio(metric_pp_parts(t, position)).unwrap_or(0.0),
            team,
            comp,
            indiv: indiv_contrib_pp(t, position).unwrap_or(0.0),
            toi_pp: t.toi.pp,
        });
    }

    let xs: Vec<Vec<f64>> = table.iter().map(|r| vec![r.team, r.comp]).collect();
    let ys: Vec<f64> = table.iter().map(|r| r.metric).collect();
    let Some(model) = fit_ols(&xs, &ys) else {
        return;
    };

    let toi_sum: f64 = table.iter().map(|r| r.toi_pp).sum();
    let indiv_mean = if toi_sum > 0.0 {
        table.iter().map(|r| r.indiv * r.toi_pp).sum::<f64>() / toi_sum
    } else {
        0.0
    };

    for row in &table {
        let Some(rating) = ratings.get_mut(&row.player) else {
            continue;
        };
        let above_exp = row.metric - model.predict(&[row.team, row.comp]);
        let above_avg = row.metric - mean;
        rating.gc60_pp = Some((above_exp + above_avg + (row.indiv - indiv_mean)) / 3.0);
    }
}

fn penalty_kill_block(
    rows: &[(PlayerId, &Totals)],
    position: Position,
    totals: &HashMap<PlayerId, Totals>,
    exposures: &HashMap<PlayerId, Vec<Exposure>>,
    pos_of: impl Fn(PlayerId) -> Option<Position>,
    ratings: &mut BTreeMap<PlayerId, PlayerRating>,
) {
    let Some(mean) = league_mean(rows, position, metric_pk_parts) else {
        return;
    };

    struct Row {
        player: PlayerId,
        metric: f64,
        team: f64,
        comp: f64,
    }

    let mut table: Vec<Row> = Vec::new();
    for &(player, t) in rows {
        if t.toi.pk <= 0.0 {
            continue;
        }
        let (mut team, mut comp, mut matched) = (0.0, 0.0, false);
        for exp in exposures.get(&player).map(Vec::as_slice).unwrap_or(&[]) {
            if exp.bucket != StrengthBucket::PenaltyKill || exp.seconds <= 0.0 {
                continue;
            }
            let Some(other) = totals.get(&exp.other) else {
                continue;
            };
            let other_pos = match pos_of(exp.other) {
                Some(Position::Goalie) | None => continue,
                Some(p) => p,
            };
            if exp.same_team {
                if other.toi.pk <= 0.0 {
                    continue;
                }
                // only three skaters kill alongside the rated player
                let m = ratio(metric_pk_parts(other, other_pos)).unwrap_or(0.0);
                team += m * exp.seconds / (t.toi.pk * 3.0);
            } else {
                if other.toi.pp <= 0.0 {
                    continue;
                }
                let m = ratio(metric_pp_parts(other, other_pos)).unwrap_or(0.0);
                comp += m * exp.seconds / (t.toi.pk * 5.0);
            }
            matched = true;
        }
        if !matched {
            continue;
        }
        table.push(Row {
            player,
            metric: ratio(metric_pk_parts(t, position)).unwrap_or(0.0),
            team,
            comp,
        });
    }

    let xs: Vec<Vec<f64>> = table.iter().map(|r| vec![r.team, r.comp]).collect();
    let ys: Vec<f64> = table.iter().map(|r| r.metric).collect();
    let Some(model) = fit_ols(&xs, &ys) else {
        return;
    };

    for row in &table {
        let Some(rating) = ratings.get_mut(&row.player) else {
            continue;
        };
        let above_exp = row.metric - model.predict(&[row.team, row.comp]);
        let above_avg = row.metric - mean;
        rating.gp60_pk = Some((above_exp + above_avg) / -2.0);
    }
}

fn penalty_block(
    rows: &[(PlayerId, &Totals)],
    position: Position,
    pen_val: f64,
    ratings: &mut BTreeMap<PlayerId, PlayerRating>,
) {
    // drawn penalties are worth a bit less than taken ones cost, and the
    // asymmetry is larger for defensemen
    let (drawn_w, taken_w) = match position {
        Position::Forward => (0.837, 1.163),
        _ => (0.733, 1.267),
    };
    for &(player, t) in rows {
        if t.toi.total <= 0.0 {
            continue;
        }
        if let Some(rating) = ratings.get_mut(&player) {
            rating.gi60_pens = Some(
                pen_val * 3600.0 * (drawn_w * t.penalties_drawn - taken_w * t.penalties)
                    / t.toi.total,
            );
        }
    }
}

fn goalie_block(goalies: &[(PlayerId, &Totals)], ratings: &mut BTreeMap<PlayerId, PlayerRating>) {
    struct Row {
        player: PlayerId,
        sv_pct: f64,
        shots_against: f64,
        gsax_adj: f64,
        toi: f64,
    }

    let mut table: Vec<Row> = Vec::new();
    for &(player, t) in goalies {
        let shots_against = t.on_ice_against.raw.all.shots;
        if shots_against <= 0.0 || t.toi.total <= 0.0 {
            continue;
        }
        table.push(Row {
            player,
            sv_pct: 1.0 - t.on_ice_against.raw.all.goals / shots_against,
            shots_against,
            gsax_adj: t.on_ice_against.adjusted.all.xg - t.on_ice_against.adjusted.all.goals,
            toi: t.toi.total,
        });
    }

    let toi_sum: f64 = table.iter().map(|r| r.toi).sum();
    if toi_sum <= 0.0 {
        return;
    }
    let sv_mean = table.iter().map(|r| r.sv_pct * r.toi).sum::<f64>() / toi_sum;

    for row in &table {
        let Some(rating) = ratings.get_mut(&row.player) else {
            continue;
        };
        let saved_above_avg = (row.sv_pct - sv_mean) * row.shots_against;
        rating.gi60 = Some(
            (0.020 * saved_above_avg + 0.018 * row.gsax_adj) * 3600.0 / (row.toi * (0.020 + 0.018)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::PlayerGame;
    use crate::TeamCode;
    use assert_approx_eq::assert_approx_eq;

    fn make_totals() -> Totals {
        Totals::default()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn make_player_game(
        player: i64,
        game: i64,
        day: u32,
        team: &str,
        opponent: &str,
    ) -> PlayerGame {
        PlayerGame {
            player: PlayerId(player),
            game_id: GameId(game),
            date: date(2018, 10, day),
            season: Season(2018),
            team: TeamCode::new(team),
            opponent: TeamCode::new(opponent),
            is_home: true,
            slot_counts: [1, 0, 0, 0, 0, 0],
            individual: AttributionStats::default(),
            assists: AssistStats::default(),
            penalties: 0.0,
            penalties_drawn: 0.0,
            on_ice_for: AttributionStats::default(),
            on_ice_against: AttributionStats::default(),
            rebounds_against: 0.0,
            toi: Toi {
                total: 1200.0,
                ev5: 1000.0,
                pp: 100.0,
                pk: 100.0,
            },
            zone_starts: ZoneStarts::default(),
            playoffs: false,
        }
    }

    #[test]
    fn test_forward_offense_metric_units() {
        let mut t = make_totals();
        t.toi.ev5 = 3600.0;
        t.on_ice_for.raw.ev5.goals = 2.0;
        t.on_ice_for.adjusted.ev5.shots = 20.0;
        t.on_ice_for.raw.ev5.xg_flurry = 1.5;

        let metric = ratio(metric_o_parts(&t, Position::Forward)).unwrap();
        let expected = (0.163 * 2.0 + 0.185 * 0.091286 * 20.0 + 0.262 * 1.5)
            / (0.163 + 0.185 + 0.262);
        assert_approx_eq!(metric, expected, 1e-10);
    }

    #[test]
    fn test_league_mean_weights_by_ice_time() {
        let mut heavy = make_totals();
        heavy.toi.ev5 = 3600.0;
        heavy.on_ice_for.raw.ev5.goals = 3.0;
        let mut light = make_totals();
        light.toi.ev5 = 360.0;
        light.on_ice_for.raw.ev5.goals = 3.0;

        let rows = vec![(PlayerId(1), &heavy), (PlayerId(2), &light)];
        let mean = league_mean(&rows, Position::Forward, metric_o_parts).unwrap();
        let heavy_rate = ratio(metric_o_parts(&heavy, Position::Forward)).unwrap();
        let light_rate = ratio(metric_o_parts(&light, Position::Forward)).unwrap();

        // ratio of sums lands much closer to the heavy minutes player
        assert!(mean < (heavy_rate + light_rate) / 2.0);
        assert!(mean > heavy_rate);
        assert!(mean < light_rate);
    }

    #[test]
    fn test_penalty_value_from_special_teams_rates() {
        let mut totals = HashMap::new();
        let mut t = make_totals();
        t.toi.pp = 3600.0;
        t.toi.pk = 3600.0;
        t.on_ice_for.raw.pp.goals = 6.0;
        t.on_ice_for.raw.pk.goals = 1.0;
        totals.insert(PlayerId(1), t);

        // (6.0 - 1.0) goals per hour difference over a two minute minor
        assert_approx_eq!(penalty_value(&totals).unwrap(), 5.0 * 2.0 / 60.0, 1e-10);
    }

    #[test]
    fn test_penalty_impact_sign() {
        let mut draws = make_totals();
        draws.toi.total = 3600.0;
        draws.penalties_drawn = 4.0;
        let mut takes = make_totals();
        takes.toi.total = 3600.0;
        takes.penalties = 4.0;

        let mut ratings = BTreeMap::new();
        for (player, t) in [(PlayerId(1), &draws), (PlayerId(2), &takes)] {
            ratings.insert(
                player,
                PlayerRating {
                    player,
                    season: Season(2018),
                    date: date(2018, 10, 10),
                    position: Position::Forward,
                    toi: t.toi.total,
                    toi_5v5: 0.0,
                    toi_pp: 0.0,
                    toi_pk: 0.0,
                    gc60_5v5: None,
                    gp60_5v5: None,
                    gc60_pp: None,
                    gp60_pk: None,
                    gi60_pens: None,
                    gi60: None,
                },
            );
        }
        let rows = vec![(PlayerId(1), &draws), (PlayerId(2), &takes)];
        penalty_block(&rows, Position::Forward, 0.15, &mut ratings);

        assert!(ratings[&PlayerId(1)].gi60_pens.unwrap() > 0.0);
        assert!(ratings[&PlayerId(2)].gi60_pens.unwrap() < 0.0);
    }

    #[test]
    fn test_goalie_rating_relative_to_peers() {
        let mut sharp = make_totals();
        sharp.toi.total = 3600.0;
        sharp.toi.ev5 = 3000.0;
        sharp.on_ice_against.raw.all.shots = 30.0;
        sharp.on_ice_against.raw.all.goals = 1.0;
        sharp.on_ice_against.adjusted.all.xg = 2.5;
        sharp.on_ice_against.adjusted.all.goals = 1.0;
        let mut leaky = make_totals();
        leaky.toi.total = 3600.0;
        leaky.toi.ev5 = 3000.0;
        leaky.on_ice_against.raw.all.shots = 30.0;
        leaky.on_ice_against.raw.all.goals = 5.0;
        leaky.on_ice_against.adjusted.all.xg = 2.5;
        leaky.on_ice_against.adjusted.all.goals = 5.0;

        let mut ratings = BTreeMap::new();
        for (player, t) in [(PlayerId(1), &sharp), (PlayerId(2), &leaky)] {
            ratings.insert(
                player,
                PlayerRating {
                    player,
                    season: Season(2018),
                    date: date(2018, 10, 10),
                    position: Position::Goalie,
                    toi: t.toi.total,
                    toi_5v5: t.toi.ev5,
                    toi_pp: 0.0,
                    toi_pk: 0.0,
                    gc60_5v5: None,
                    gp60_5v5: None,
                    gc60_pp: None,
                    gp60_pk: None,
                    gi60_pens: None,
                    gi60: None,
                },
            );
        }
        let rows = vec![(PlayerId(1), &sharp), (PlayerId(2), &leaky)];
        goalie_block(&rows, &mut ratings);

        let sharp_gi = ratings[&PlayerId(1)].gi60.unwrap();
        let leaky_gi = ratings[&PlayerId(2)].gi60.unwrap();
        assert!(sharp_gi > 0.0);
        assert!(leaky_gi < 0.0);
        assert!(sharp_gi > leaky_gi);
    }

    #[test]
    fn test_first_date_has_no_ratings() {
        let games = vec![make_player_game(1, 1, 3, "TOR", "MTL")];
        let mut positions = HashMap::new();
        positions.insert((PlayerId(1), Season(2018)), Position::Forward);

        let ratings = player_inseason_ratings(&games, &[], &positions);
        assert!(ratings.is_empty());
    }

    #[test]
    fn test_second_date_rates_from_prior_games_only() {
        let games = vec![
            make_player_game(1, 1, 3, "TOR", "MTL"),
            make_player_game(1, 2, 5, "TOR", "BOS"),
            make_player_game(2, 2, 5, "TOR", "BOS"),
        ];
        let mut positions = HashMap::new();
        positions.insert((PlayerId(1), Season(2018)), Position::Forward);
        positions.insert((PlayerId(2), Season(2018)), Position::Forward);

        let ratings = player_inseason_ratings(&games, &[], &positions);
        // only player 1 played before October 5th
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].player, PlayerId(1));
        assert_eq!(ratings[0].date, date(2018, 10, 5));
        assert_approx_eq!(ratings[0].toi_5v5, 1000.0);
    }

    #[test]
    fn test_playoff_games_do_not_feed_ratings() {
        let mut playoff = make_player_game(1, 1, 3, "TOR", "MTL");
        playoff.playoffs = true;
        let games = vec![playoff, make_player_game(1, 2, 5, "TOR", "BOS")];
        let mut positions = HashMap::new();
        positions.insert((PlayerId(1), Season(2018)), Position::Forward);

        // the playoff game is the only prior game, so nothing to rate from
        let ratings = player_inseason_ratings(&games, &[], &positions);
        assert!(ratings.is_empty());
    }
}
