//! External model contracts
//!
//! The expected-goals and game-outcome models are trained and served
//! outside this crate; they are consumed through these traits. Model
//! failures and row-count mismatches always surface as errors.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::events::ShotEvent;
use crate::{GameId, PuckError, Result, TeamCode};

/// Shot-level expected-goals model: one probability per shot, in order
pub trait ShotModel {
    fn predict(&self, shots: &[ShotEvent]) -> Result<Vec<f64>>;
}

/// Shot probabilities scored offline, stored as a JSON array aligned
/// with the normalized shot stream for the same event export.
pub struct PrecomputedShotModel {
    probs: Vec<f64>,
}

impl PrecomputedShotModel {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let probs: Vec<f64> = serde_json::from_str(&content)?;
        Ok(PrecomputedShotModel { probs })
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }
}

impl ShotModel for PrecomputedShotModel {
    fn predict(&self, shots: &[ShotEvent]) -> Result<Vec<f64>> {
        if self.probs.len() != shots.len() {
            return Err(PuckError::PredictionLength {
                expected: shots.len(),
                got: self.probs.len(),
            });
        }
        Ok(self.probs.clone())
    }
}

/// Feature row for one scheduled game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameFeatures {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub home_team: TeamCode,
    pub away_team: TeamCode,
    /// Elo difference, home minus away
    pub elo_diff: f64,
    /// Blended player and team rating features, in a stable order
    pub features: Vec<f64>,
}

/// Game-outcome prediction
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GamePrediction {
    pub home_win_prob: f64,
}

/// Game-level outcome model: one prediction per feature row, in order
pub trait GameModel {
    fn predict(&self, games: &[GameFeatures]) -> Result<Vec<GamePrediction>>;
}

/// Run a game model and enforce the one-prediction-per-row contract.
pub fn predict_games(
    model: &dyn GameModel,
    games: &[GameFeatures],
) -> Result<Vec<GamePrediction>> {
    let predictions = model.predict(games)?;
    if predictions.len() != games.len() {
        return Err(PuckError::PredictionLength {
            expected: games.len(),
            got: predictions.len(),
        });
    }
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ShotCategory;
    use crate::{EventType, PlayerId, Season, Strength};

    struct CoinFlip;

    impl GameModel for CoinFlip {
        fn predict(&self, games: &[GameFeatures]) -> Result<Vec<GamePrediction>> {
            Ok(games
                .iter()
                .map(|_| GamePrediction { home_win_prob: 0.5 })
                .collect())
        }
    }

    struct Broken;

    impl GameModel for Broken {
        fn predict(&self, _games: &[GameFeatures]) -> Result<Vec<GamePrediction>> {
            Err(PuckError::Model("backend unavailable".to_string()))
        }
    }

    fn make_features() -> GameFeatures {
        GameFeatures {
            game_id: GameId(1),
            date: NaiveDate::from_ymd_opt(2018, 10, 3).unwrap(),
            home_team: TeamCode::new("TOR"),
            away_team: TeamCode::new("MTL"),
            elo_diff: 12.0,
            features: vec![0.1, -0.2],
        }
    }

    #[test]
    fn test_predictions_match_rows() {
        let out = predict_games(&CoinFlip, &[make_features()]).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_model_errors_propagate() {
        assert!(predict_games(&Broken, &[make_features()]).is_err());
    }

    fn make_shot() -> ShotEvent {
        ShotEvent {
            event_index: 0,
            game_id: GameId(1),
            season: Season(2018),
            date: NaiveDate::from_ymd_opt(2018, 10, 3).unwrap(),
            period: 1,
            seconds_elapsed: 30,
            team: TeamCode::new("TOR"),
            is_home: true,
            event: EventType::Shot,
            strength: Strength::FIVE_ON_FIVE,
            shooter: Some(PlayerId(8)),
            x: 60.0,
            y: 10.0,
            score_diff: 0,
            category: ShotCategory::Other,
            seconds_since_last: 5.0,
            distance_from_last: 12.0,
            seconds_since_last_shot: 40.0,
            distance_from_last_shot: 25.0,
            is_goal: false,
        }
    }

    #[test]
    fn test_precomputed_probs_in_order() {
        let model = PrecomputedShotModel {
            probs: vec![0.1, 0.3],
        };
        let out = model.predict(&[make_shot(), make_shot()]).unwrap();
        assert_eq!(out, vec![0.1, 0.3]);
    }

    #[test]
    fn test_precomputed_length_mismatch_is_error() {
        let model = PrecomputedShotModel { probs: vec![0.1] };
        assert!(model.predict(&[make_shot(), make_shot()]).is_err());
    }
}
