//! Hockey play-by-play processing and performance ratings
//!
//! Turns raw play-by-play events and shift charts into per-game on-ice
//! attribution facts, team Elo ratings and in-season player/team ratings.

pub mod aggregate;
pub mod data;
pub mod events;
pub mod predict;
pub mod ratings;
pub mod shifts;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unique identifier for a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub i64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player({})", self.0)
    }
}

/// Unique identifier for a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameId(pub i64);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Game({})", self.0)
    }
}

/// Three-letter team code as used in the play-by-play feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamCode(pub String);

impl TeamCode {
    pub fn new(code: &str) -> Self {
        TeamCode(code.to_string())
    }
}

impl fmt::Display for TeamCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Season identified by its starting year (2018 = the 2018-19 season)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Season(pub u16);

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.0, (self.0 + 1) % 100)
    }
}

/// Player position group, inferred from roster slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Forward,
    Defense,
    Goalie,
}

impl Position {
    pub fn code(&self) -> &'static str {
        match self {
            Position::Forward => "F",
            Position::Defense => "D",
            Position::Goalie => "G",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "F" => Some(Position::Forward),
            "D" => Some(Position::Defense),
            "G" => Some(Position::Goalie),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Skater-strength state as "<for>x<against>" (goalies excluded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Strength {
    pub own: u8,
    pub opp: u8,
}

impl Strength {
    pub const FIVE_ON_FIVE: Strength = Strength { own: 5, opp: 5 };

    pub fn new(own: u8, opp: u8) -> Self {
        Strength { own, opp }
    }

    /// The same state seen from the other bench
    pub fn reversed(&self) -> Strength {
        Strength {
            own: self.opp,
            opp: self.own,
        }
    }

    /// True for the nine states kept by the normalizer
    pub fn is_legal(&self) -> bool {
        matches!(
            (self.own, self.opp),
            (5, 5) | (5, 4) | (4, 5) | (5, 3) | (3, 5) | (4, 3) | (3, 4) | (4, 4) | (3, 3)
        )
    }

    pub fn bucket(&self) -> StrengthBucket {
        match (self.own, self.opp) {
            (5, 5) => StrengthBucket::FiveOnFive,
            (5, 4) | (5, 3) | (4, 3) => StrengthBucket::PowerPlay,
            (4, 5) | (3, 5) | (3, 4) => StrengthBucket::PenaltyKill,
            _ => StrengthBucket::Other,
        }
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.own, self.opp)
    }
}

impl std::str::FromStr for Strength {
    type Err = PuckError;

    fn from_str(s: &str) -> Result<Self> {
        let (own, opp) = s
            .split_once('x')
            .ok_or_else(|| PuckError::Parse(format!("Bad strength state: {}", s)))?;
        Ok(Strength {
            own: own
                .parse()
                .map_err(|_| PuckError::Parse(format!("Bad strength state: {}", s)))?,
            opp: opp
                .parse()
                .map_err(|_| PuckError::Parse(format!("Bad strength state: {}", s)))?,
        })
    }
}

impl TryFrom<String> for Strength {
    type Error = PuckError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Strength> for String {
    fn from(s: Strength) -> String {
        s.to_string()
    }
}

/// Strength grouping used for stat buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrengthBucket {
    FiveOnFive,
    PowerPlay,
    PenaltyKill,
    /// 4x4 and 3x3; counted in the all-situations totals only
    Other,
}

impl StrengthBucket {
    /// The same situation seen from the other bench
    pub fn flipped(&self) -> StrengthBucket {
        match self {
            StrengthBucket::PowerPlay => StrengthBucket::PenaltyKill,
            StrengthBucket::PenaltyKill => StrengthBucket::PowerPlay,
            other => *other,
        }
    }
}

/// Play-by-play event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "SHOT")]
    Shot,
    #[serde(rename = "MISS")]
    Miss,
    #[serde(rename = "BLOCK")]
    Block,
    #[serde(rename = "GOAL")]
    Goal,
    #[serde(rename = "FAC")]
    Faceoff,
    #[serde(rename = "HIT")]
    Hit,
    #[serde(rename = "GIVE")]
    Giveaway,
    #[serde(rename = "TAKE")]
    Takeaway,
    #[serde(rename = "PENL")]
    Penalty,
    #[serde(other)]
    Other,
}

impl EventType {
    /// Events that carry usable location context
    pub fn is_context(&self) -> bool {
        matches!(
            self,
            EventType::Shot
                | EventType::Miss
                | EventType::Goal
                | EventType::Faceoff
                | EventType::Hit
                | EventType::Block
                | EventType::Giveaway
                | EventType::Takeaway
        )
    }

    /// Unblocked shot attempts (Fenwick events)
    pub fn is_shot_attempt(&self) -> bool {
        matches!(self, EventType::Shot | EventType::Miss | EventType::Goal)
    }
}

/// Zone label from the home bench's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Zone {
    #[serde(rename = "Off")]
    Offensive,
    #[serde(rename = "Neu")]
    Neutral,
    #[serde(rename = "Def")]
    Defensive,
}

impl Zone {
    /// The zone as seen from the other bench
    pub fn flipped(&self) -> Zone {
        match self {
            Zone::Offensive => Zone::Defensive,
            Zone::Neutral => Zone::Neutral,
            Zone::Defensive => Zone::Offensive,
        }
    }
}

/// On-ice roster for one bench: slots 0-4 are skaters, slot 5 the goalie
pub type RosterSlots = [Option<PlayerId>; 6];

/// A single play-by-play event as ingested from the feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: Season,
    pub period: u8,
    /// Seconds elapsed within the period
    pub seconds_elapsed: u32,
    pub event: EventType,
    /// Acting team, if the event has one
    pub team: Option<TeamCode>,
    pub home_team: TeamCode,
    pub away_team: TeamCode,
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// Strength from the home bench's point of view
    pub strength: Option<Strength>,
    pub home_score: u32,
    pub away_score: u32,
    pub home_on_ice: RosterSlots,
    pub away_on_ice: RosterSlots,
    /// Primary actor (shooter, penalized player, faceoff winner)
    pub p1: Option<PlayerId>,
    /// Primary assist, shot blocker or player drawing a penalty
    pub p2: Option<PlayerId>,
    /// Secondary assist
    pub p3: Option<PlayerId>,
    pub home_zone: Option<Zone>,
    /// Free-text event detail (penalty type, shot type)
    pub detail: Option<String>,
}

impl RawEvent {
    pub fn is_home_event(&self) -> bool {
        self.team.as_ref() == Some(&self.home_team)
    }

    /// Strength from the acting team's point of view
    pub fn acting_strength(&self) -> Option<Strength> {
        let s = self.strength?;
        if self.is_home_event() {
            Some(s)
        } else {
            Some(s.reversed())
        }
    }

    /// Score differential from the acting team's point of view
    pub fn acting_score_diff(&self) -> i32 {
        let diff = self.home_score as i32 - self.away_score as i32;
        if self.is_home_event() {
            diff
        } else {
            -diff
        }
    }

    pub fn home_goalie(&self) -> Option<PlayerId> {
        self.home_on_ice[5]
    }

    pub fn away_goalie(&self) -> Option<PlayerId> {
        self.away_on_ice[5]
    }

    /// Goalie defending against the acting team
    pub fn opposing_goalie(&self) -> Option<PlayerId> {
        if self.is_home_event() {
            self.away_goalie()
        } else {
            self.home_goalie()
        }
    }
}

/// One player's shift, seconds relative to the period start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub season: Season,
    pub period: u8,
    pub player: PlayerId,
    pub team: TeamCode,
    pub start: u32,
    pub end: u32,
}

/// Regulation periods run 1200 seconds. Only the 3-on-3 regular-season
/// overtime is shortened to 300; playoff overtimes are full-length 5v5
/// periods, including period 4.
pub fn period_length(period: u8, strength: Strength) -> u32 {
    if period == 4 && strength == Strength::new(3, 3) {
        300
    } else {
        1200
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum PuckError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Games out of order: {game} on {date} arrived after a later game")]
    OutOfOrder { game: GameId, date: NaiveDate },

    #[error("Duplicate game {game} for {team}")]
    DuplicateGame { game: GameId, team: TeamCode },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Model returned {got} predictions for {expected} rows")]
    PredictionLength { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, PuckError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub database_path: String,
    /// Score/venue adjustment factor table (JSON)
    pub adjustments_path: String,
    /// Team metric priors and blending coefficients (JSON)
    pub team_priors_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Games per shift-overlap batch
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig {
                database_path: "data/puck.db".to_string(),
                adjustments_path: "data/adjustments.json".to_string(),
                team_priors_path: "data/team_priors.json".to_string(),
            },
            processing: ProcessingConfig { batch_size: 10 },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PuckError::Config(format!("Failed to read config file {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| PuckError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PuckError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
