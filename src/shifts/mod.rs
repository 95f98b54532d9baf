//! Shift-overlap engine
//!
//! Derives strength segments from the event stream, intersects player
//! shifts pairwise against them and accumulates time-on-ice tables.
//! Games are processed in fixed-size batches; every computation is pure
//! per game, so batch boundaries never change the output.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    period_length, EventType, GameId, PlayerId, RawEvent, Season, Shift, Strength, StrengthBucket,
    TeamCode,
};

/// A span of game time at one skater-strength state (home perspective)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthSegment {
    pub game_id: GameId,
    pub period: u8,
    pub strength: Strength,
    pub start: u32,
    pub end: u32,
}

/// Derive strength segments from the ordered event stream.
///
/// Takes the first event per second, lets penalty events adopt the strength
/// of the following event (the on-ice count changes as the penalty starts)
/// and collapses consecutive identical states. Each period is covered from
/// second zero to the period length.
pub fn strength_segments(events: &[RawEvent]) -> Vec<StrengthSegment> {
    let mut order: Vec<usize> = (0..events.len())
        .filter(|&i| events[i].home_zone.is_some() && events[i].strength.is_some())
        .collect();
    order.sort_by_key(|&i| (events[i].game_id, events[i].period, events[i].seconds_elapsed, i));

    // first event per (game, period, second), penalties take the next strength
    let mut rows: Vec<(GameId, u8, u32, Strength)> = Vec::new();
    for (pos, &i) in order.iter().enumerate() {
        let ev = &events[i];
        if let Some(&(g, p, s, _)) = rows.last() {
            if (g, p, s) == (ev.game_id, ev.period, ev.seconds_elapsed) {
                continue;
            }
        }
        let mut strength = match ev.strength {
            Some(s) => s,
            None => continue,
        };
        if ev.event == EventType::Penalty {
            if let Some(&next) = order.get(pos + 1) {
                if events[next].game_id == ev.game_id {
                    if let Some(s) = events[next].strength {
                        strength = s;
                    }
                }
            }
        }
        rows.push((ev.game_id, ev.period, ev.seconds_elapsed, strength));
    }

    let mut segments = Vec::new();
    let mut current: Option<StrengthSegment> = None;

    for (game_id, period, seconds, strength) in rows {
        match current.take() {
            Some(mut seg) if seg.game_id == game_id && seg.period == period => {
                if seconds == seg.start {
                    seg.strength = strength;
                    seg.end = period_length(period, strength);
                    current = Some(seg);
                } else if seg.strength != strength {
                    seg.end = seconds;
                    segments.push(seg);
                    current = Some(StrengthSegment {
                        game_id,
                        period,
                        strength,
                        start: seconds,
                        end: period_length(period, strength),
                    });
                } else {
                    current = Some(seg);
                }
            }
            prior => {
                // new period or game; a running segment ends at its period end
                let carried = match &prior {
                    Some(seg) if seg.game_id == game_id && seconds > 0 => seg.strength,
                    _ => strength,
                };
                if let Some(seg) = prior {
                    segments.push(seg);
                }
                if carried != strength && seconds > 0 {
                    // the carried state changed before the first observation
                    segments.push(StrengthSegment {
                        game_id,
                        period,
                        strength: carried,
                        start: 0,
                        end: seconds,
                    });
                    current = Some(StrengthSegment {
                        game_id,
                        period,
                        strength,
                        start: seconds,
                        end: period_length(period, strength),
                    });
                } else {
                    current = Some(StrengthSegment {
                        game_id,
                        period,
                        strength: carried,
                        start: 0,
                        end: period_length(period, carried),
                    });
                }
            }
        }
    }
    if let Some(seg) = current {
        segments.push(seg);
    }

    segments
}

/// Accumulated ice time for one player in one game, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Toi {
    pub total: f64,
    pub ev5: f64,
    pub pp: f64,
    pub pk: f64,
}

impl Toi {
    fn add(&mut self, bucket: StrengthBucket, seconds: f64) {
        self.total += seconds;
        match bucket {
            StrengthBucket::FiveOnFive => self.ev5 += seconds,
            StrengthBucket::PowerPlay => self.pp += seconds,
            StrengthBucket::PenaltyKill => self.pk += seconds,
            StrengthBucket::Other => {}
        }
    }

    pub fn merge(&mut self, other: &Toi) {
        self.total += other.total;
        self.ev5 += other.ev5;
        self.pp += other.pp;
        self.pk += other.pk;
    }
}

/// Shared ice time for an ordered player pair in one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapRow {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: Season,
    pub player: PlayerId,
    pub other: PlayerId,
    /// Strength bucket from `player`'s perspective
    pub bucket: StrengthBucket,
    pub same_team: bool,
    pub seconds: f64,
}

/// Output of the shift-overlap engine
#[derive(Debug, Clone, Default)]
pub struct ShiftOverlaps {
    /// Both orders of every pair are present
    pub rows: Vec<OverlapRow>,
    pub toi: HashMap<(PlayerId, GameId), Toi>,
}

impl ShiftOverlaps {
    fn merge(&mut self, other: ShiftOverlaps) {
        self.rows.extend(other.rows);
        for (key, toi) in other.toi {
            let entry = self.toi.entry(key).or_default();
            entry.total += toi.total;
            entry.ev5 += toi.ev5;
            entry.pp += toi.pp;
            entry.pk += toi.pk;
        }
    }
}

/// Intersect shifts pairwise against strength segments, game by game in
/// batches of `batch_size` games. `home_teams` maps each game to its home
/// side so segment strengths can be flipped into each player's perspective.
pub fn compute_overlaps(
    shifts: &[Shift],
    segments: &[StrengthSegment],
    home_teams: &HashMap<GameId, TeamCode>,
    batch_size: usize,
) -> ShiftOverlaps {
    let mut by_game: BTreeMap<GameId, Vec<&Shift>> = BTreeMap::new();
    for shift in shifts {
        by_game.entry(shift.game_id).or_default().push(shift);
    }
    let mut segs_by_game: HashMap<GameId, Vec<&StrengthSegment>> = HashMap::new();
    for seg in segments {
        segs_by_game.entry(seg.game_id).or_default().push(seg);
    }

    let games: Vec<GameId> = by_game.keys().copied().collect();
    let batch_size = batch_size.max(1);
    let mut out = ShiftOverlaps::default();

    for batch in games.chunks(batch_size) {
        debug!("overlap batch of {} games starting at {}", batch.len(), batch[0]);
        for game in batch {
            let empty = Vec::new();
            let segs = segs_by_game.get(game).unwrap_or(&empty);
            out.merge(game_overlaps(&by_game[game], segs, home_teams.get(game)));
        }
    }

    out.rows.sort_by(|a, b| {
        (a.game_id, a.player, a.other, a.same_team)
            .cmp(&(b.game_id, b.player, b.other, b.same_team))
    });
    out
}

fn game_overlaps(
    shifts: &[&Shift],
    segments: &[&StrengthSegment],
    home_team: Option<&TeamCode>,
) -> ShiftOverlaps {
    let mut out = ShiftOverlaps::default();
    let mut pair_seconds: HashMap<(PlayerId, PlayerId, StrengthBucket, bool), f64> = HashMap::new();
    let mut meta: Option<(GameId, NaiveDate, Season)> = None;

    let perspective = |seg: &StrengthSegment, team: &TeamCode| -> Strength {
        match home_team {
            Some(home) if team != home => seg.strength.reversed(),
            _ => seg.strength,
        }
    };

    for (i, a) in shifts.iter().enumerate() {
        meta.get_or_insert((a.game_id, a.date, a.season));

        // per-player time on ice by strength
        for seg in segments {
            if seg.period != a.period {
                continue;
            }
            let start = a.start.max(seg.start);
            let end = a.end.min(seg.end);
            if end > start {
                out.toi
                    .entry((a.player, a.game_id))
                    .or_default()
                    .add(perspective(seg, &a.team).bucket(), (end - start) as f64);
            }
        }

        for b in shifts.iter().skip(i + 1) {
            if a.player == b.player || a.period != b.period {
                continue;
            }
            let same_team = a.team == b.team;
            for seg in segments {
                if seg.period != a.period {
                    continue;
                }
                let start = a.start.max(b.start).max(seg.start);
                let end = a.end.min(b.end).min(seg.end);
                if end <= start {
                    continue;
                }
                let shared = (end - start) as f64;
                *pair_seconds
                    .entry((a.player, b.player, perspective(seg, &a.team).bucket(), same_team))
                    .or_default() += shared;
                *pair_seconds
                    .entry((b.player, a.player, perspective(seg, &b.team).bucket(), same_team))
                    .or_default() += shared;
            }
        }
    }

    if let Some((game_id, date, season)) = meta {
        for ((player, other, bucket, same_team), seconds) in pair_seconds {
            out.rows.push(OverlapRow {
                game_id,
                date,
                season,
                player,
                other,
                bucket,
                same_team,
                seconds,
            });
        }
    }
    out
}
