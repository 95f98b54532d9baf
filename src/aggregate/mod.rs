//! On-ice attribution aggregation
//!
//! Collapses the event stream into per-player-game and per-team-game fact
//! rows: individual stats, on-ice for/against splits by strength bucket,
//! raw and score/venue adjusted, plus positions and playoff flags.

pub mod adjustments;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::events::{ScoredShot, ShotCategory};
use crate::shifts::Toi;
use crate::{
    EventType, GameId, PlayerId, Position, RawEvent, Season, StrengthBucket, TeamCode, Zone,
};

pub use adjustments::{Adjustment, AdjustmentTable};

/// Shot-metric counters for one situation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShotStats {
    pub goals: f64,
    pub shots: f64,
    pub attempts: f64,
    pub unblocked: f64,
    pub xg: f64,
    pub xg_flurry: f64,
}

impl ShotStats {
    pub fn add(&mut self, other: &ShotStats) {
        self.goals += other.goals;
        self.shots += other.shots;
        self.attempts += other.attempts;
        self.unblocked += other.unblocked;
        self.xg += other.xg;
        self.xg_flurry += other.xg_flurry;
    }

    pub fn scaled(&self, factor: f64) -> ShotStats {
        ShotStats {
            goals: self.goals * factor,
            shots: self.shots * factor,
            attempts: self.attempts * factor,
            unblocked: self.unblocked * factor,
            xg: self.xg * factor,
            xg_flurry: self.xg_flurry * factor,
        }
    }
}

/// Shot metrics split by strength bucket; `all` covers every situation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub all: ShotStats,
    pub ev5: ShotStats,
    pub pp: ShotStats,
    pub pk: ShotStats,
}

impl BucketStats {
    fn add(&mut self, bucket: StrengthBucket, stats: &ShotStats) {
        self.all.add(stats);
        match bucket {
            StrengthBucket::FiveOnFive => self.ev5.add(stats),
            StrengthBucket::PowerPlay => self.pp.add(stats),
            StrengthBucket::PenaltyKill => self.pk.add(stats),
            StrengthBucket::Other => {}
        }
    }

    pub fn merge(&mut self, other: &BucketStats) {
        self.all.add(&other.all);
        self.ev5.add(&other.ev5);
        self.pp.add(&other.pp);
        self.pk.add(&other.pk);
    }

    pub fn scaled(&self, factor: f64) -> BucketStats {
        BucketStats {
            all: self.all.scaled(factor),
            ev5: self.ev5.scaled(factor),
            pp: self.pp.scaled(factor),
            pk: self.pk.scaled(factor),
        }
    }
}

/// Raw and score/venue adjusted views of the same counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionStats {
    pub raw: BucketStats,
    pub adjusted: BucketStats,
}

impl AttributionStats {
    fn add(&mut self, bucket: StrengthBucket, delta: &EventDelta) {
        self.raw.add(bucket, &delta.raw);
        self.adjusted.add(bucket, &delta.adjusted);
    }

    pub fn merge(&mut self, other: &AttributionStats) {
        self.raw.merge(&other.raw);
        self.adjusted.merge(&other.adjusted);
    }

    pub fn scaled(&self, factor: f64) -> AttributionStats {
        AttributionStats {
            raw: self.raw.scaled(factor),
            adjusted: self.adjusted.scaled(factor),
        }
    }
}

/// Assist counters, raw and weighted by the adjusted goal value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Assists {
    pub primary: f64,
    pub secondary: f64,
    pub primary_adj: f64,
    pub secondary_adj: f64,
}

impl Assists {
    pub fn merge(&mut self, other: &Assists) {
        self.primary += other.primary;
        self.secondary += other.secondary;
        self.primary_adj += other.primary_adj;
        self.secondary_adj += other.secondary_adj;
    }
}

/// Assists split by strength bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistStats {
    pub all: Assists,
    pub ev5: Assists,
    pub pp: Assists,
    pub pk: Assists,
}

impl AssistStats {
    pub fn merge(&mut self, other: &AssistStats) {
        self.all.merge(&other.all);
        self.ev5.merge(&other.ev5);
        self.pp.merge(&other.pp);
        self.pk.merge(&other.pk);
    }

    fn add_primary(&mut self, bucket: StrengthBucket, goal_adj: f64) {
        for a in self.for_bucket(bucket) {
            a.primary += 1.0;
            a.primary_adj += goal_adj;
        }
    }

    fn add_secondary(&mut self, bucket: StrengthBucket, goal_adj: f64) {
        for a in self.for_bucket(bucket) {
            a.secondary += 1.0;
            a.secondary_adj += goal_adj;
        }
    }

    fn for_bucket(&mut self, bucket: StrengthBucket) -> Vec<&mut Assists> {
        let mut targets = vec![&mut self.all];
        match bucket {
            StrengthBucket::FiveOnFive => targets.push(&mut self.ev5),
            StrengthBucket::PowerPlay => targets.push(&mut self.pp),
            StrengthBucket::PenaltyKill => targets.push(&mut self.pk),
            StrengthBucket::Other => {}
        }
        targets
    }
}

/// Faceoffs taken while on ice, by zone from the player's bench
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneStarts {
    pub off: f64,
    pub neu: f64,
    pub def: f64,
}

impl ZoneStarts {
    fn add(&mut self, zone: Zone) {
        match zone {
            Zone::Offensive => self.off += 1.0,
            Zone::Neutral => self.neu += 1.0,
            Zone::Defensive => self.def += 1.0,
        }
    }

    pub fn merge(&mut self, other: &ZoneStarts) {
        self.off += other.off;
        self.neu += other.neu;
        self.def += other.def;
    }

    pub fn total(&self) -> f64 {
        self.off + self.neu + self.def
    }
}

/// One player's complete line for one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerGame {
    pub player: PlayerId,
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: Season,
    pub team: TeamCode,
    pub opponent: TeamCode,
    pub is_home: bool,
    /// Event appearances per roster slot; drives position inference
    pub slot_counts: [u32; 6],
    pub individual: AttributionStats,
    pub assists: AssistStats,
    pub penalties: f64,
    pub penalties_drawn: f64,
    pub on_ice_for: AttributionStats,
    pub on_ice_against: AttributionStats,
    /// Rebound shots faced while on ice (goalie workload)
    pub rebounds_against: f64,
    pub toi: Toi,
    pub zone_starts: ZoneStarts,
    pub playoffs: bool,
}

impl PlayerGame {
    fn new(player: PlayerId, ev: &RawEvent, is_home: bool) -> Self {
        PlayerGame {
            player,
            game_id: ev.game_id,
            date: ev.date,
            season: ev.season,
            team: if is_home {
                ev.home_team.clone()
            } else {
                ev.away_team.clone()
            },
            opponent: if is_home {
                ev.away_team.clone()
            } else {
                ev.home_team.clone()
            },
            is_home,
            slot_counts: [0; 6],
            individual: AttributionStats::default(),
            assists: AssistStats::default(),
            penalties: 0.0,
            penalties_drawn: 0.0,
            on_ice_for: AttributionStats::default(),
            on_ice_against: AttributionStats::default(),
            rebounds_against: 0.0,
            toi: Toi::default(),
            zone_starts: ZoneStarts::default(),
            playoffs: false,
        }
    }
}

/// One team's line for one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamGame {
    pub team: TeamCode,
    pub opponent: TeamCode,
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: Season,
    pub is_home: bool,
    pub stats_for: AttributionStats,
    pub stats_against: AttributionStats,
    /// Goals through overtime, shootout excluded
    pub goals_for: u32,
    pub goals_against: u32,
    pub shootout_goals_for: u32,
    pub shootout_goals_against: u32,
    pub penalties: f64,
    pub penalties_drawn: f64,
    pub starting_goalie: Option<PlayerId>,
    pub win: bool,
    pub playoffs: bool,
}

impl TeamGame {
    /// Final scoreboard goals, a won shootout counting one
    pub fn final_goals_for(&self) -> u32 {
        self.goals_for + u32::from(self.shootout_goals_for > self.shootout_goals_against)
    }

    pub fn final_goals_against(&self) -> u32 {
        self.goals_against + u32::from(self.shootout_goals_against > self.shootout_goals_for)
    }
}

/// Per-shot model values joined back to the event stream by index
#[derive(Debug, Clone, Copy)]
struct XgValue {
    xg: f64,
    xg_flurry: f64,
    category: ShotCategory,
}

fn xg_by_index(shots: &[ScoredShot]) -> HashMap<usize, XgValue> {
    shots
        .iter()
        .map(|s| {
            (
                s.shot.event_index,
                XgValue {
                    xg: s.xg,
                    xg_flurry: s.xg_flurry,
                    category: s.shot.category,
                },
            )
        })
        .collect()
}

/// Raw and adjusted counters contributed by one event
struct EventDelta {
    bucket: StrengthBucket,
    /// True when the attempt belongs to the home side
    acting_home: bool,
    raw: ShotStats,
    adjusted: ShotStats,
    is_rebound: bool,
}

fn event_delta(
    ev: &RawEvent,
    xg: Option<&XgValue>,
    table: &AdjustmentTable,
) -> Option<EventDelta> {
    if ev.period > 4 {
        return None;
    }
    // the feed attributes a block to the blocking team, but the attempt
    // belongs to the shooters, so the side flips there
    let acting_home = ev.is_home_event() != (ev.event == EventType::Block);
    let mut strength = ev.strength?;
    if !acting_home {
        strength = strength.reversed();
    }
    let mut raw = ShotStats::default();
    match ev.event {
        EventType::Goal => {
            raw.goals = 1.0;
            raw.shots = 1.0;
            raw.attempts = 1.0;
            raw.unblocked = 1.0;
        }
        EventType::Shot => {
            raw.shots = 1.0;
            raw.attempts = 1.0;
            raw.unblocked = 1.0;
        }
        EventType::Miss => {
            raw.attempts = 1.0;
            raw.unblocked = 1.0;
        }
        EventType::Block => {
            raw.attempts = 1.0;
        }
        _ => return None,
    }
    if let Some(v) = xg {
        raw.xg = v.xg;
        raw.xg_flurry = v.xg_flurry;
    }

    let empty_net = if acting_home {
        ev.away_goalie()
    } else {
        ev.home_goalie()
    }
    .is_none();
    let adj = table.lookup(
        strength,
        empty_net,
        acting_home,
        ev.home_score as i32 - ev.away_score as i32,
        ev.period,
    );
    let adjusted = ShotStats {
        // empty-net goals carry no goaltending or venue signal
        goals: if empty_net { 0.0 } else { raw.goals * adj.goals },
        shots: raw.shots * adj.shots,
        attempts: raw.attempts * adj.attempts,
        unblocked: raw.unblocked * adj.unblocked,
        xg: raw.xg * adj.xg,
        xg_flurry: raw.xg_flurry * adj.xg,
    };

    Some(EventDelta {
        bucket: strength.bucket(),
        acting_home,
        raw,
        adjusted,
        is_rebound: xg.map_or(false, |v| v.category == ShotCategory::Rebound),
    })
}

fn is_fight(detail: Option<&str>) -> bool {
    detail.map_or(false, |d| d.to_lowercase().contains("fight"))
}

/// Aggregate the event stream into per-player-game rows.
///
/// Every event credits all twelve players on the ice: the acting side's
/// six under on-ice-for, the other six under on-ice-against with the
/// special-teams buckets swapped. Pure in its inputs; aggregating the same
/// events twice yields identical rows.
pub fn aggregate_player_games(
    events: &[RawEvent],
    shots: &[ScoredShot],
    toi: &HashMap<(PlayerId, GameId), Toi>,
    table: &AdjustmentTable,
) -> Vec<PlayerGame> {
    let xg = xg_by_index(shots);
    let mut rows: BTreeMap<(GameId, PlayerId), PlayerGame> = BTreeMap::new();

    for (index, ev) in events.iter().enumerate() {
        // roster observation
        for (side_home, roster) in [(true, &ev.home_on_ice), (false, &ev.away_on_ice)] {
            for (slot, player) in roster.iter().enumerate() {
                let Some(player) = *player else { continue };
                let row = rows
                    .entry((ev.game_id, player))
                    .or_insert_with(|| PlayerGame::new(player, ev, side_home));
                row.slot_counts[slot] += 1;
            }
        }

        // zone starts at 5v5 faceoffs
        if ev.event == EventType::Faceoff
            && ev.strength.map_or(false, |s| s.bucket() == StrengthBucket::FiveOnFive)
        {
            if let Some(zone) = ev.home_zone {
                credit_zone_starts(&mut rows, ev, zone);
            }
        }

        // penalties, fights excluded
        if ev.event == EventType::Penalty && !is_fight(ev.detail.as_deref()) {
            if let Some(p1) = ev.p1 {
                if let Some(row) = rows.get_mut(&(ev.game_id, p1)) {
                    row.penalties += 1.0;
                }
            }
            if let Some(p2) = ev.p2 {
                if let Some(row) = rows.get_mut(&(ev.game_id, p2)) {
                    row.penalties_drawn += 1.0;
                }
            }
        }

        let Some(delta) = event_delta(ev, xg.get(&index), table) else {
            continue;
        };
        let acting_home = delta.acting_home;

        for (side_home, roster) in [(true, &ev.home_on_ice), (false, &ev.away_on_ice)] {
            for player in roster.iter().flatten() {
                let Some(row) = rows.get_mut(&(ev.game_id, *player)) else {
                    continue;
                };
                if side_home == acting_home {
                    row.on_ice_for.add(delta.bucket, &delta);
                } else {
                    // the shooters' power play is the defenders' kill
                    row.on_ice_against.add(delta.bucket.flipped(), &delta);
                    if delta.is_rebound {
                        row.rebounds_against += 1.0;
                    }
                }
            }
        }

        // individual credit; a block belongs to p2 on the defending side
        if ev.event.is_shot_attempt() {
            if let Some(p1) = ev.p1 {
                if let Some(row) = rows.get_mut(&(ev.game_id, p1)) {
                    row.individual.add(delta.bucket, &delta);
                }
            }
        }
        if ev.event == EventType::Block {
            if let Some(p2) = ev.p2 {
                if let Some(row) = rows.get_mut(&(ev.game_id, p2)) {
                    row.individual.add(delta.bucket.flipped(), &delta);
                }
            }
        }
        if ev.event == EventType::Goal {
            if let Some(p2) = ev.p2 {
                if let Some(row) = rows.get_mut(&(ev.game_id, p2)) {
                    row.assists.add_primary(delta.bucket, delta.adjusted.goals);
                }
            }
            if let Some(p3) = ev.p3 {
                if let Some(row) = rows.get_mut(&(ev.game_id, p3)) {
                    row.assists.add_secondary(delta.bucket, delta.adjusted.goals);
                }
            }
        }
    }

    let mut out: Vec<PlayerGame> = rows.into_values().collect();
    let mut missing_toi = 0usize;
    for row in &mut out {
        match toi.get(&(row.player, row.game_id)) {
            Some(t) => row.toi = *t,
            None => missing_toi += 1,
        }
    }
    if missing_toi > 0 {
        debug!("{} player-games without shift data", missing_toi);
    }
    out
}

fn credit_zone_starts(
    rows: &mut BTreeMap<(GameId, PlayerId), PlayerGame>,
    ev: &RawEvent,
    home_zone: Zone,
) {
    for (side_home, roster) in [(true, &ev.home_on_ice), (false, &ev.away_on_ice)] {
        let zone = if side_home { home_zone } else { home_zone.flipped() };
        for player in roster.iter().flatten() {
            if let Some(row) = rows.get_mut(&(ev.game_id, *player)) {
                row.zone_starts.add(zone);
            }
        }
    }
}

/// Aggregate the event stream into two rows per game, one per team.
pub fn aggregate_team_games(
    events: &[RawEvent],
    shots: &[ScoredShot],
    table: &AdjustmentTable,
) -> Vec<TeamGame> {
    let xg = xg_by_index(shots);
    let mut rows: BTreeMap<(GameId, TeamCode), TeamGame> = BTreeMap::new();
    let mut first_seen: HashMap<GameId, (u8, u32)> = HashMap::new();

    for (index, ev) in events.iter().enumerate() {
        for (team, opponent, is_home) in [
            (&ev.home_team, &ev.away_team, true),
            (&ev.away_team, &ev.home_team, false),
        ] {
            rows.entry((ev.game_id, team.clone()))
                .or_insert_with(|| TeamGame {
                    team: team.clone(),
                    opponent: opponent.clone(),
                    game_id: ev.game_id,
                    date: ev.date,
                    season: ev.season,
                    is_home,
                    stats_for: AttributionStats::default(),
                    stats_against: AttributionStats::default(),
                    goals_for: 0,
                    goals_against: 0,
                    shootout_goals_for: 0,
                    shootout_goals_against: 0,
                    penalties: 0.0,
                    penalties_drawn: 0.0,
                    starting_goalie: None,
                    win: false,
                    playoffs: false,
                });
        }

        // starting goalies come from the earliest event of the game
        let earliest = first_seen
            .entry(ev.game_id)
            .or_insert((ev.period, ev.seconds_elapsed));
        if (ev.period, ev.seconds_elapsed) <= *earliest {
            *earliest = (ev.period, ev.seconds_elapsed);
            if let Some(g) = ev.home_goalie() {
                if let Some(row) = rows.get_mut(&(ev.game_id, ev.home_team.clone())) {
                    row.starting_goalie = Some(g);
                }
            }
            if let Some(g) = ev.away_goalie() {
                if let Some(row) = rows.get_mut(&(ev.game_id, ev.away_team.clone())) {
                    row.starting_goalie = Some(g);
                }
            }
        }

        let Some(acting) = ev.team.clone() else { continue };
        let other = if acting == ev.home_team {
            ev.away_team.clone()
        } else {
            ev.home_team.clone()
        };

        if ev.event == EventType::Goal {
            if ev.period > 4 {
                if let Some(row) = rows.get_mut(&(ev.game_id, acting.clone())) {
                    row.shootout_goals_for += 1;
                }
                if let Some(row) = rows.get_mut(&(ev.game_id, other.clone())) {
                    row.shootout_goals_against += 1;
                }
            } else {
                if let Some(row) = rows.get_mut(&(ev.game_id, acting.clone())) {
                    row.goals_for += 1;
                }
                if let Some(row) = rows.get_mut(&(ev.game_id, other.clone())) {
                    row.goals_against += 1;
                }
            }
        }

        if ev.event == EventType::Penalty && !is_fight(ev.detail.as_deref()) {
            if let Some(row) = rows.get_mut(&(ev.game_id, acting.clone())) {
                row.penalties += 1.0;
            }
            if let Some(row) = rows.get_mut(&(ev.game_id, other.clone())) {
                row.penalties_drawn += 1.0;
            }
        }

        if let Some(delta) = event_delta(ev, xg.get(&index), table) {
            // a blocked attempt counts for the shooting side, not the
            // blockers the feed names
            let (shooters, defenders) = if delta.acting_home {
                (ev.home_team.clone(), ev.away_team.clone())
            } else {
                (ev.away_team.clone(), ev.home_team.clone())
            };
            if let Some(row) = rows.get_mut(&(ev.game_id, shooters)) {
                row.stats_for.add(delta.bucket, &delta);
            }
            if let Some(row) = rows.get_mut(&(ev.game_id, defenders)) {
                row.stats_against.add(delta.bucket.flipped(), &delta);
            }
        }
    }

    let mut out: Vec<TeamGame> = rows.into_values().collect();
    for row in &mut out {
        row.win = row.final_goals_for() > row.final_goals_against();
    }
    out
}

/// Infer each player's position for a season by majority roster slot:
/// slots 1-3 forward, 4-5 defense, 6 goalie.
pub fn positions(player_games: &[PlayerGame]) -> HashMap<(PlayerId, Season), Position> {
    let mut counts: HashMap<(PlayerId, Season), [u32; 3]> = HashMap::new();
    for pg in player_games {
        let entry = counts.entry((pg.player, pg.season)).or_default();
        entry[0] += pg.slot_counts[0] + pg.slot_counts[1] + pg.slot_counts[2];
        entry[1] += pg.slot_counts[3] + pg.slot_counts[4];
        entry[2] += pg.slot_counts[5];
    }
    counts
        .into_iter()
        .map(|(key, [f, d, g])| {
            let position = if f >= d && f >= g {
                Position::Forward
            } else if d >= g {
                Position::Defense
            } else {
                Position::Goalie
            };
            (key, position)
        })
        .collect()
}

fn regular_season_cutoff(season: Season, rank: usize, date: NaiveDate) -> bool {
    match season.0 {
        // lockout year
        2012 => rank > 48,
        // the 2019-20 season stopped for the pandemic and resumed as playoffs
        2019 => NaiveDate::from_ymd_opt(2020, 3, 12).map_or(false, |cut| date > cut),
        2020 => rank > 56,
        _ => rank > 82,
    }
}

/// Flag games past each team's regular-season schedule as playoff games.
pub fn mark_playoffs(player_games: &mut [PlayerGame], team_games: &mut [TeamGame]) {
    let mut dates: HashMap<(TeamCode, Season), BTreeSet<NaiveDate>> = HashMap::new();
    for tg in team_games.iter() {
        dates
            .entry((tg.team.clone(), tg.season))
            .or_default()
            .insert(tg.date);
    }
    for pg in player_games.iter() {
        dates
            .entry((pg.team.clone(), pg.season))
            .or_default()
            .insert(pg.date);
    }

    let mut ranks: HashMap<(TeamCode, Season, NaiveDate), usize> = HashMap::new();
    for ((team, season), set) in &dates {
        for (i, date) in set.iter().enumerate() {
            ranks.insert((team.clone(), *season, *date), i + 1);
        }
    }

    for tg in team_games.iter_mut() {
        if let Some(&rank) = ranks.get(&(tg.team.clone(), tg.season, tg.date)) {
            tg.playoffs = regular_season_cutoff(tg.season, rank, tg.date);
        }
    }
    for pg in player_games.iter_mut() {
        if let Some(&rank) = ranks.get(&(pg.team.clone(), pg.season, pg.date)) {
            pg.playoffs = regular_season_cutoff(pg.season, rank, pg.date);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{attach_xg, normalize, ShotEvent};
    use crate::predict::ShotModel;
    use crate::{Result, Strength};
    use assert_approx_eq::assert_approx_eq;

    const GAME: GameId = GameId(2018020001);

    fn rosters() -> ([Option<PlayerId>; 6], [Option<PlayerId>; 6]) {
        let home = [1, 2, 3, 4, 5, 30].map(|n| Some(PlayerId(n)));
        let away = [6, 7, 8, 9, 10, 31].map(|n| Some(PlayerId(n)));
        (home, away)
    }

    fn make_event(seconds: u32, event: EventType, team: &str) -> RawEvent {
        let (home_on_ice, away_on_ice) = rosters();
        RawEvent {
            game_id: GAME,
            date: NaiveDate::from_ymd_opt(2018, 10, 3).unwrap(),
            season: Season(2018),
            period: 1,
            seconds_elapsed: seconds,
            event,
            team: Some(TeamCode::new(team)),
            home_team: TeamCode::new("TOR"),
            away_team: TeamCode::new("MTL"),
            x: Some(60.0),
            y: Some(5.0),
            strength: Some(Strength::FIVE_ON_FIVE),
            home_score: 0,
            away_score: 0,
            home_on_ice,
            away_on_ice,
            p1: Some(PlayerId(1)),
            p2: None,
            p3: None,
            home_zone: Some(Zone::Offensive),
            detail: None,
        }
    }

    struct HalfModel;

    impl ShotModel for HalfModel {
        fn predict(&self, shots: &[ShotEvent]) -> Result<Vec<f64>> {
            Ok(vec![0.5; shots.len()])
        }
    }

    fn aggregate(events: &[RawEvent]) -> Vec<PlayerGame> {
        let shots = attach_xg(normalize(events), &HalfModel).unwrap();
        aggregate_player_games(events, &shots, &HashMap::new(), &AdjustmentTable::default())
    }

    fn row<'a>(rows: &'a [PlayerGame], player: i64) -> &'a PlayerGame {
        rows.iter().find(|r| r.player == PlayerId(player)).unwrap()
    }

    #[test]
    fn test_goal_credits_all_twelve_players() {
        let events = vec![make_event(100, EventType::Goal, "TOR")];
        let rows = aggregate(&events);
        assert_eq!(rows.len(), 12);

        for p in [1, 2, 3, 4, 5, 30] {
            let pg = row(&rows, p);
            assert_approx_eq!(pg.on_ice_for.raw.ev5.goals, 1.0);
            assert_approx_eq!(pg.on_ice_for.raw.all.goals, 1.0);
            assert_approx_eq!(pg.on_ice_against.raw.all.goals, 0.0);
        }
        for p in [6, 7, 8, 9, 10, 31] {
            let pg = row(&rows, p);
            assert_approx_eq!(pg.on_ice_against.raw.ev5.goals, 1.0);
            assert_approx_eq!(pg.on_ice_for.raw.all.goals, 0.0);
        }
        // only the shooter gets individual credit
        assert_approx_eq!(row(&rows, 1).individual.raw.all.goals, 1.0);
        assert_approx_eq!(row(&rows, 2).individual.raw.all.goals, 0.0);
    }

    #[test]
    fn test_bucket_decomposition_sums_to_all() {
        let mut pp_shot = make_event(200, EventType::Shot, "TOR");
        pp_shot.strength = Some(Strength::new(5, 4));
        let events = vec![make_event(100, EventType::Shot, "TOR"), pp_shot];
        let rows = aggregate(&events);

        let pg = row(&rows, 1);
        let b = pg.on_ice_for.raw;
        assert_approx_eq!(b.all.shots, b.ev5.shots + b.pp.shots + b.pk.shots);
        assert_approx_eq!(b.pp.shots, 1.0);
    }

    #[test]
    fn test_against_side_swaps_special_teams() {
        // MTL shoots on its power play; TOR faces it shorthanded
        let mut ev = make_event(100, EventType::Shot, "MTL");
        ev.strength = Some(Strength::new(4, 5));
        ev.p1 = Some(PlayerId(6));
        let rows = aggregate(&[ev]);

        assert_approx_eq!(row(&rows, 6).on_ice_for.raw.pp.shots, 1.0);
        assert_approx_eq!(row(&rows, 1).on_ice_against.raw.pk.shots, 1.0);
        assert_approx_eq!(row(&rows, 1).on_ice_against.raw.pp.shots, 0.0);
    }

    #[test]
    fn test_blocked_attempts_count_for_the_shooters() {
        // the feed names the blocking team on a BLOCK; the attempt still
        // belongs to the shooting side
        let mut ev = make_event(100, EventType::Block, "TOR");
        ev.p1 = Some(PlayerId(6));
        ev.p2 = Some(PlayerId(2));
        let rows = aggregate(&[ev]);

        for p in [6, 7, 8, 9, 10, 31] {
            assert_approx_eq!(row(&rows, p).on_ice_for.raw.ev5.attempts, 1.0);
        }
        for p in [1, 2, 3, 4, 5, 30] {
            assert_approx_eq!(row(&rows, p).on_ice_against.raw.ev5.attempts, 1.0);
        }
        // the blocker alone gets individual credit
        assert_approx_eq!(row(&rows, 2).individual.raw.ev5.attempts, 1.0);
        assert_approx_eq!(row(&rows, 6).individual.raw.all.attempts, 0.0);
    }

    #[test]
    fn test_blocked_attempts_flip_team_credit() {
        let mut ev = make_event(100, EventType::Block, "TOR");
        ev.p1 = Some(PlayerId(6));
        ev.p2 = Some(PlayerId(2));
        let teams = aggregate_team_games(&[ev], &[], &AdjustmentTable::default());

        let mtl = teams.iter().find(|t| t.team.0 == "MTL").unwrap();
        let tor = teams.iter().find(|t| t.team.0 == "TOR").unwrap();
        assert_approx_eq!(mtl.stats_for.raw.ev5.attempts, 1.0);
        assert_approx_eq!(tor.stats_against.raw.ev5.attempts, 1.0);
        assert_approx_eq!(tor.stats_for.raw.all.attempts, 0.0);
    }

    #[test]
    fn test_adjustments_key_on_the_home_score_gap() {
        use adjustments::AdjustmentEntry;
        let table = AdjustmentTable::from_entries(vec![AdjustmentEntry {
            strength: "5x5".to_string(),
            home: false,
            score_diff: 1,
            period: 1,
            factors: Adjustment {
                goals: 2.0,
                shots: 2.0,
                attempts: 2.0,
                unblocked: 2.0,
                xg: 2.0,
            },
        }]);
        // MTL shoots while trailing; the row keys on the home side's lead
        let mut ev = make_event(100, EventType::Shot, "MTL");
        ev.p1 = Some(PlayerId(6));
        ev.home_score = 1;
        let shots = attach_xg(normalize(&[ev.clone()]), &HalfModel).unwrap();
        let rows = aggregate_player_games(&[ev], &shots, &HashMap::new(), &table);

        assert_approx_eq!(row(&rows, 6).on_ice_for.adjusted.ev5.shots, 2.0);
    }

    #[test]
    fn test_assist_credit() {
        let mut ev = make_event(100, EventType::Goal, "TOR");
        ev.p2 = Some(PlayerId(2));
        ev.p3 = Some(PlayerId(3));
        let rows = aggregate(&[ev]);

        assert_approx_eq!(row(&rows, 2).assists.all.primary, 1.0);
        assert_approx_eq!(row(&rows, 2).assists.ev5.primary, 1.0);
        assert_approx_eq!(row(&rows, 3).assists.all.secondary, 1.0);
        assert_approx_eq!(row(&rows, 2).assists.all.secondary, 0.0);
    }

    #[test]
    fn test_fighting_majors_not_counted() {
        let mut minor = make_event(100, EventType::Penalty, "TOR");
        minor.p2 = Some(PlayerId(6));
        minor.detail = Some("Tripping (2 min)".to_string());
        let mut fight = make_event(200, EventType::Penalty, "TOR");
        fight.detail = Some("Fighting (maj)".to_string());
        let rows = aggregate(&[minor, fight]);

        assert_approx_eq!(row(&rows, 1).penalties, 1.0);
        assert_approx_eq!(row(&rows, 6).penalties_drawn, 1.0);
    }

    #[test]
    fn test_zone_starts_flip_for_the_visitors() {
        let events = vec![make_event(0, EventType::Faceoff, "TOR")];
        let rows = aggregate(&events);

        assert_approx_eq!(row(&rows, 1).zone_starts.off, 1.0);
        assert_approx_eq!(row(&rows, 6).zone_starts.def, 1.0);
        assert_approx_eq!(row(&rows, 6).zone_starts.off, 0.0);
    }

    #[test]
    fn test_empty_net_goal_zeroed_in_adjusted() {
        let mut ev = make_event(1150, EventType::Goal, "TOR");
        ev.away_on_ice[5] = None;
        let rows = aggregate(&[ev]);

        let pg = row(&rows, 1);
        assert_approx_eq!(pg.on_ice_for.raw.all.goals, 1.0);
        assert_approx_eq!(pg.on_ice_for.adjusted.all.goals, 0.0);
    }

    #[test]
    fn test_rebound_shots_count_against_the_defenders() {
        let events = vec![
            make_event(100, EventType::Shot, "TOR"),
            make_event(101, EventType::Shot, "TOR"),
        ];
        let rows = aggregate(&events);
        assert_approx_eq!(row(&rows, 31).rebounds_against, 1.0);
        assert_approx_eq!(row(&rows, 1).rebounds_against, 0.0);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let events = vec![
            make_event(0, EventType::Faceoff, "TOR"),
            make_event(100, EventType::Shot, "TOR"),
            make_event(500, EventType::Goal, "MTL"),
        ];
        assert_eq!(aggregate(&events), aggregate(&events));
    }

    #[test]
    fn test_position_majority_vote() {
        let events = vec![
            make_event(100, EventType::Shot, "TOR"),
            make_event(200, EventType::Shot, "TOR"),
        ];
        let rows = aggregate(&events);
        let pos = positions(&rows);

        assert_eq!(pos[&(PlayerId(1), Season(2018))], Position::Forward);
        assert_eq!(pos[&(PlayerId(4), Season(2018))], Position::Defense);
        assert_eq!(pos[&(PlayerId(30), Season(2018))], Position::Goalie);
    }

    #[test]
    fn test_playoffs_start_after_game_82() {
        let mut team_games = Vec::new();
        for i in 0..83u32 {
            let mut ev = make_event(100, EventType::Goal, "TOR");
            ev.game_id = GameId(i as i64);
            ev.date = NaiveDate::from_ymd_opt(2018, 10, 3).unwrap()
                + chrono::Duration::days(i as i64 * 2);
            team_games.extend(aggregate_team_games(
                &[ev],
                &[],
                &AdjustmentTable::default(),
            ));
        }
        let mut no_players: Vec<PlayerGame> = Vec::new();
        mark_playoffs(&mut no_players, &mut team_games);

        let tor: Vec<&TeamGame> = team_games.iter().filter(|t| t.team.0 == "TOR").collect();
        assert!(!tor[81].playoffs);
        assert!(tor[82].playoffs);
    }

    #[test]
    fn test_shootout_decides_the_win_flag() {
        let mut so_goal = make_event(0, EventType::Goal, "MTL");
        so_goal.period = 5;
        let events = vec![
            make_event(100, EventType::Goal, "TOR"),
            make_event(900, EventType::Goal, "MTL"),
            so_goal,
        ];
        let teams = aggregate_team_games(&events, &[], &AdjustmentTable::default());

        let mtl = teams.iter().find(|t| t.team.0 == "MTL").unwrap();
        let tor = teams.iter().find(|t| t.team.0 == "TOR").unwrap();
        assert!(mtl.win);
        assert!(!tor.win);
        assert_eq!(mtl.final_goals_for(), 2);
        assert_eq!(mtl.goals_for, 1);
    }

    #[test]
    fn test_starting_goalies() {
        let events = vec![make_event(0, EventType::Faceoff, "TOR")];
        let teams = aggregate_team_games(&events, &[], &AdjustmentTable::default());

        let tor = teams.iter().find(|t| t.team.0 == "TOR").unwrap();
        let mtl = teams.iter().find(|t| t.team.0 == "MTL").unwrap();
        assert_eq!(tor.starting_goalie, Some(PlayerId(30)));
        assert_eq!(mtl.starting_goalie, Some(PlayerId(31)));
    }
}
