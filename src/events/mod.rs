//! Play-by-play event normalization
//!
//! Filters the raw feed down to scoreable shot events with location,
//! previous-event context and Rebound/Rush categories attached.

use log::debug;

use crate::predict::ShotModel;
use crate::{EventType, GameId, PlayerId, RawEvent, Result, Season, Strength, TeamCode};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Shot category from the preceding event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotCategory {
    Rebound,
    Rush,
    Other,
}

/// A normalized shot attempt ready for the shot model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotEvent {
    /// Index of the source event in the ingested stream
    pub event_index: usize,
    pub game_id: GameId,
    pub season: Season,
    pub date: NaiveDate,
    pub period: u8,
    pub seconds_elapsed: u32,
    pub team: TeamCode,
    pub is_home: bool,
    pub event: EventType,
    /// Strength from the shooter's point of view
    pub strength: Strength,
    pub shooter: Option<PlayerId>,
    /// Coordinates mirrored into a single attacking half
    pub x: f64,
    pub y: f64,
    /// Score differential from the shooter's point of view
    pub score_diff: i32,
    pub category: ShotCategory,
    pub seconds_since_last: f64,
    pub distance_from_last: f64,
    /// Seconds since the previous shot attempt in the period, 1200.0
    /// when there is none
    pub seconds_since_last_shot: f64,
    /// Distance from the previous shot attempt, -1.0 when there is none
    pub distance_from_last_shot: f64,
    pub is_goal: bool,
}

/// Previous-event context carried across the scan
struct PrevContext {
    game_id: GameId,
    period: u8,
    event: EventType,
    team: Option<TeamCode>,
    seconds_elapsed: u32,
    x: f64,
    y: f64,
}

/// Filter raw events down to shot attempts with context attached.
///
/// Keeps SHOT/MISS/GOAL events at a legal strength with known coordinates
/// and a goalie in the opposing net. Context (previous event, Rebound/Rush)
/// is built from all location-bearing events and resets across game and
/// period boundaries.
pub fn normalize(events: &[RawEvent]) -> Vec<ShotEvent> {
    let mut order: Vec<usize> = (0..events.len())
        .filter(|&i| events[i].event.is_context())
        .collect();
    order.sort_by_key(|&i| (events[i].game_id, events[i].period, events[i].seconds_elapsed, i));

    let dropped = order
        .iter()
        .filter(|&&i| events[i].x.is_none() || events[i].y.is_none())
        .count();
    if dropped > 0 {
        debug!("dropped {} context events without coordinates", dropped);
    }

    let mut shots = Vec::new();
    let mut prev: Option<PrevContext> = None;
    let mut prev_shot: Option<(GameId, u8, u32, f64, f64)> = None;

    for &i in &order {
        let ev = &events[i];
        let (x, y) = match (ev.x, ev.y) {
            (Some(x), Some(y)) => (x, y),
            _ => continue,
        };

        // context resets at game and period boundaries
        let context = prev
            .as_ref()
            .filter(|p| p.game_id == ev.game_id && p.period == ev.period);

        if ev.event.is_shot_attempt() {
            if let Some(mut shot) = build_shot(i, ev, x, y, context) {
                if let Some((g, p, sec, px, py)) = prev_shot {
                    if g == ev.game_id && p == ev.period {
                        shot.seconds_since_last_shot =
                            ev.seconds_elapsed.saturating_sub(sec) as f64;
                        let dx = x - px;
                        let dy = y - py;
                        shot.distance_from_last_shot = (dx * dx + dy * dy).sqrt();
                    }
                }
                prev_shot = Some((ev.game_id, ev.period, ev.seconds_elapsed, x, y));
                shots.push(shot);
            }
        }

        prev = Some(PrevContext {
            game_id: ev.game_id,
            period: ev.period,
            event: ev.event,
            team: ev.team.clone(),
            seconds_elapsed: ev.seconds_elapsed,
            x,
            y,
        });
    }

    shots
}

fn build_shot(
    index: usize,
    ev: &RawEvent,
    x: f64,
    y: f64,
    prev: Option<&PrevContext>,
) -> Option<ShotEvent> {
    let strength = ev.acting_strength()?;
    if !strength.is_legal() {
        return None;
    }
    ev.team.as_ref()?;
    // shots at an empty net carry no goaltending signal
    ev.opposing_goalie()?;

    // no prior event in the period defaults to a stale, distant context
    let (seconds_since_last, distance_from_last, x_distance, prev_shot_same_team) = match prev {
        Some(p) => {
            let dt = ev.seconds_elapsed.saturating_sub(p.seconds_elapsed) as f64;
            let dx = x - p.x;
            let dy = y - p.y;
            (
                dt,
                (dx * dx + dy * dy).sqrt(),
                dx.abs(),
                p.event == EventType::Shot && p.team == ev.team,
            )
        }
        None => (1200.0, -1.0, -1.0, false),
    };

    // Rush overrides Rebound when both windows match
    let mut category = ShotCategory::Other;
    if prev_shot_same_team && seconds_since_last <= 2.0 {
        category = ShotCategory::Rebound;
    }
    if prev.is_some() && seconds_since_last <= 4.0 && x_distance >= 50.0 {
        category = ShotCategory::Rush;
    }

    // mirror everything into one attacking half
    let factor = if x > 0.0 { 1.0 } else { -1.0 };

    Some(ShotEvent {
        event_index: index,
        game_id: ev.game_id,
        season: ev.season,
        date: ev.date,
        period: ev.period,
        seconds_elapsed: ev.seconds_elapsed,
        team: ev.team.clone()?,
        is_home: ev.is_home_event(),
        event: ev.event,
        strength,
        shooter: ev.p1,
        x: x * factor,
        y: y * factor,
        score_diff: ev.acting_score_diff(),
        category,
        seconds_since_last,
        distance_from_last,
        seconds_since_last_shot: 1200.0,
        distance_from_last_shot: -1.0,
        is_goal: ev.event == EventType::Goal,
    })
}

/// A shot with its model probability and flurry-adjusted value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredShot {
    pub shot: ShotEvent,
    pub xg: f64,
    /// Rebounds are discounted by the chance the previous shot already scored
    pub xg_flurry: f64,
}

/// Score the shot stream with an expected-goals model and apply the
/// flurry adjustment: a rebound's value is `xg * (1 - xg_prev)` where
/// `xg_prev` is the previous shot in the same game and period.
pub fn attach_xg(shots: Vec<ShotEvent>, model: &dyn ShotModel) -> Result<Vec<ScoredShot>> {
    let probs = model.predict(&shots)?;
    if probs.len() != shots.len() {
        return Err(crate::PuckError::PredictionLength {
            expected: shots.len(),
            got: probs.len(),
        });
    }

    let mut scored = Vec::with_capacity(shots.len());
    let mut prev: Option<(GameId, u8, f64)> = None;

    for (shot, xg) in shots.into_iter().zip(probs) {
        let xg_flurry = match (&shot.category, prev) {
            (ShotCategory::Rebound, Some((g, p, prev_xg)))
                if g == shot.game_id && p == shot.period =>
            {
                xg * (1.0 - prev_xg)
            }
            _ => xg,
        };
        prev = Some((shot.game_id, shot.period, xg));
        scored.push(ScoredShot {
            shot,
            xg,
            xg_flurry,
        });
    }

    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Zone;
    use assert_approx_eq::assert_approx_eq;

    fn make_event(
        seconds: u32,
        event: EventType,
        team: &str,
        x: Option<f64>,
        y: Option<f64>,
    ) -> RawEvent {
        let mut home_on_ice = [Some(PlayerId(1)); 6];
        home_on_ice[5] = Some(PlayerId(30));
        let mut away_on_ice = [Some(PlayerId(2)); 6];
        away_on_ice[5] = Some(PlayerId(31));
        RawEvent {
            game_id: GameId(2018020001),
            date: NaiveDate::from_ymd_opt(2018, 10, 3).unwrap(),
            season: Season(2018),
            period: 1,
            seconds_elapsed: seconds,
            event,
            team: Some(TeamCode::new(team)),
            home_team: TeamCode::new("TOR"),
            away_team: TeamCode::new("MTL"),
            x,
            y,
            strength: Some(Strength::FIVE_ON_FIVE),
            home_score: 0,
            away_score: 0,
            home_on_ice,
            away_on_ice,
            p1: Some(PlayerId(10)),
            p2: None,
            p3: None,
            home_zone: Some(Zone::Offensive),
            detail: None,
        }
    }

    #[test]
    fn test_rebound_tagging() {
        let events = vec![
            make_event(100, EventType::Shot, "TOR", Some(60.0), Some(10.0)),
            make_event(101, EventType::Shot, "TOR", Some(62.0), Some(-5.0)),
        ];
        let shots = normalize(&events);
        assert_eq!(shots.len(), 2);
        assert_eq!(shots[0].category, ShotCategory::Other);
        assert_eq!(shots[1].category, ShotCategory::Rebound);
    }

    #[test]
    fn test_no_rebound_across_teams() {
        let events = vec![
            make_event(100, EventType::Shot, "TOR", Some(60.0), Some(10.0)),
            make_event(101, EventType::Shot, "MTL", Some(-62.0), Some(5.0)),
        ];
        let shots = normalize(&events);
        assert_eq!(shots[1].category, ShotCategory::Other);
    }

    #[test]
    fn test_rush_overrides_rebound() {
        // same-team shot 1 second earlier but 60 units up ice
        let events = vec![
            make_event(100, EventType::Shot, "TOR", Some(10.0), Some(0.0)),
            make_event(101, EventType::Shot, "TOR", Some(70.0), Some(0.0)),
        ];
        let shots = normalize(&events);
        assert_eq!(shots[1].category, ShotCategory::Rush);
    }

    #[test]
    fn test_context_resets_across_periods() {
        let mut second = make_event(1, EventType::Shot, "TOR", Some(60.0), Some(0.0));
        second.period = 2;
        let events = vec![
            make_event(1199, EventType::Shot, "TOR", Some(60.0), Some(0.0)),
            second,
        ];
        let shots = normalize(&events);
        assert_eq!(shots[1].category, ShotCategory::Other);
        assert_approx_eq!(shots[1].seconds_since_last, 1200.0);
    }

    #[test]
    fn test_previous_shot_context_skips_other_events() {
        // the block between the two shots moves the previous-event
        // context forward but not the previous-shot context
        let events = vec![
            make_event(100, EventType::Shot, "TOR", Some(60.0), Some(0.0)),
            make_event(110, EventType::Block, "MTL", Some(50.0), Some(5.0)),
            make_event(120, EventType::Shot, "TOR", Some(60.0), Some(8.0)),
        ];
        let shots = normalize(&events);
        assert_eq!(shots.len(), 2);
        assert_approx_eq!(shots[1].seconds_since_last, 10.0);
        assert_approx_eq!(shots[1].seconds_since_last_shot, 20.0);
        assert_approx_eq!(shots[1].distance_from_last_shot, 8.0);
    }

    #[test]
    fn test_previous_shot_context_resets_across_periods() {
        let mut second = make_event(5, EventType::Shot, "TOR", Some(55.0), Some(3.0));
        second.period = 2;
        let events = vec![
            make_event(1190, EventType::Shot, "TOR", Some(60.0), Some(0.0)),
            second,
        ];
        let shots = normalize(&events);
        assert_approx_eq!(shots[0].seconds_since_last_shot, 1200.0);
        assert_approx_eq!(shots[0].distance_from_last_shot, -1.0);
        assert_approx_eq!(shots[1].seconds_since_last_shot, 1200.0);
        assert_approx_eq!(shots[1].distance_from_last_shot, -1.0);
    }

    #[test]
    fn test_empty_net_excluded() {
        let mut ev = make_event(100, EventType::Goal, "TOR", Some(60.0), Some(0.0));
        ev.away_on_ice[5] = None;
        let shots = normalize(&[ev]);
        assert!(shots.is_empty());
    }

    #[test]
    fn test_null_coordinates_dropped() {
        let events = vec![make_event(100, EventType::Shot, "TOR", None, Some(5.0))];
        assert!(normalize(&events).is_empty());
    }

    #[test]
    fn test_illegal_strength_dropped() {
        let mut ev = make_event(100, EventType::Shot, "TOR", Some(60.0), Some(0.0));
        ev.strength = Some(Strength::new(5, 2));
        assert!(normalize(&[ev]).is_empty());
    }

    #[test]
    fn test_coordinates_mirrored() {
        let events = vec![make_event(100, EventType::Shot, "MTL", Some(-60.0), Some(12.0))];
        let shots = normalize(&events);
        assert_approx_eq!(shots[0].x, 60.0);
        assert_approx_eq!(shots[0].y, -12.0);
    }

    #[test]
    fn test_away_strength_reversed() {
        let mut ev = make_event(100, EventType::Shot, "MTL", Some(-60.0), Some(0.0));
        ev.strength = Some(Strength::new(5, 4));
        let shots = normalize(&[ev]);
        assert_eq!(shots[0].strength, Strength::new(4, 5));
    }

    struct FixedModel(Vec<f64>);

    impl ShotModel for FixedModel {
        fn predict(&self, _shots: &[ShotEvent]) -> Result<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_flurry_adjustment() {
        let events = vec![
            make_event(100, EventType::Shot, "TOR", Some(60.0), Some(10.0)),
            make_event(101, EventType::Shot, "TOR", Some(62.0), Some(-5.0)),
        ];
        let shots = normalize(&events);
        let scored = attach_xg(shots, &FixedModel(vec![0.2, 0.1])).unwrap();
        assert_approx_eq!(scored[0].xg_flurry, 0.2);
        // rebound discounted by the first shot's chance of scoring
        assert_approx_eq!(scored[1].xg_flurry, 0.1 * 0.8);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let events = vec![make_event(100, EventType::Shot, "TOR", Some(60.0), Some(10.0))];
        let shots = normalize(&events);
        assert!(attach_xg(shots, &FixedModel(vec![])).is_err());
    }
}
