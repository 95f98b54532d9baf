//! SQLite storage for derived game facts and ratings

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::aggregate::{PlayerGame, TeamGame};
use crate::ratings::elo::EloSnapshot;
use crate::ratings::inseason::PlayerRating;
use crate::ratings::team::TeamRating;
use crate::{GameId, PlayerId, Position, PuckError, Result, Season, TeamCode};

/// Database connection and operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS player_games (
                player_id INTEGER NOT NULL,
                game_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                season INTEGER NOT NULL,
                team TEXT NOT NULL,
                opponent TEXT NOT NULL,
                is_home INTEGER NOT NULL,
                playoffs INTEGER NOT NULL,
                penalties REAL NOT NULL,
                penalties_drawn REAL NOT NULL,
                rebounds_against REAL NOT NULL,
                slot_counts TEXT NOT NULL,
                individual TEXT NOT NULL,
                assists TEXT NOT NULL,
                on_ice_for TEXT NOT NULL,
                on_ice_against TEXT NOT NULL,
                toi TEXT NOT NULL,
                zone_starts TEXT NOT NULL,
                PRIMARY KEY (player_id, game_id)
            );

            CREATE TABLE IF NOT EXISTS team_games (
                team TEXT NOT NULL,
                game_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                season INTEGER NOT NULL,
                opponent TEXT NOT NULL,
                is_home INTEGER NOT NULL,
                playoffs INTEGER NOT NULL,
                goals_for INTEGER NOT NULL,
                goals_against INTEGER NOT NULL,
                shootout_goals_for INTEGER NOT NULL,
                shootout_goals_against INTEGER NOT NULL,
                penalties REAL NOT NULL,
                penalties_drawn REAL NOT NULL,
                starting_goalie INTEGER,
                win INTEGER NOT NULL,
                stats_for TEXT NOT NULL,
                stats_against TEXT NOT NULL,
                PRIMARY KEY (team, game_id)
            );

            CREATE TABLE IF NOT EXISTS elo_ratings (
                team TEXT NOT NULL,
                game_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                season INTEGER NOT NULL,
                rating REAL NOT NULL,
                PRIMARY KEY (team, game_id)
            );

            CREATE TABLE IF NOT EXISTS player_ratings (
                player_id INTEGER NOT NULL,
                season INTEGER NOT NULL,
                date TEXT NOT NULL,
                position TEXT NOT NULL,
                toi REAL NOT NULL,
                toi_5v5 REAL NOT NULL,
                toi_pp REAL NOT NULL,
                toi_pk REAL NOT NULL,
                gc60_5v5 REAL,
                gp60_5v5 REAL,
                gc60_pp REAL,
                gp60_pk REAL,
                gi60_pens REAL,
                gi60 REAL,
                PRIMARY KEY (player_id, season, date)
            );

            CREATE TABLE IF NOT EXISTS team_ratings (
                team TEXT NOT NULL,
                season INTEGER NOT NULL,
                date TEXT NOT NULL,
                games INTEGER NOT NULL,
                for_mean TEXT NOT NULL,
                against_mean TEXT NOT NULL,
                PRIMARY KEY (team, season, date)
            );

            CREATE INDEX IF NOT EXISTS idx_player_games_date ON player_games(date);
            CREATE INDEX IF NOT EXISTS idx_team_games_date ON team_games(date);
            CREATE INDEX IF NOT EXISTS idx_player_ratings_date ON player_ratings(date);
            "#,
        )?;
        Ok(())
    }

    // ==================== Player games ====================

    /// Insert or replace one player game row
    pub fn upsert_player_game(&self, pg: &PlayerGame) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO player_games (player_id, game_id, date, season, team, opponent,
                is_home, playoffs, penalties, penalties_drawn, rebounds_against,
                slot_counts, individual, assists, on_ice_for, on_ice_against, toi, zone_starts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(player_id, game_id) DO UPDATE SET
                date = excluded.date,
                season = excluded.season,
                team = excluded.team,
                opponent = excluded.opponent,
                is_home = excluded.is_home,
                playoffs = excluded.playoffs,
                penalties = excluded.penalties,
                penalties_drawn = excluded.penalties_drawn,
                rebounds_against = excluded.rebounds_against,
                slot_counts = excluded.slot_counts,
                individual = excluded.individual,
                assists = excluded.assists,
                on_ice_for = excluded.on_ice_for,
                on_ice_against = excluded.on_ice_against,
                toi = excluded.toi,
                zone_starts = excluded.zone_starts
            "#,
            params![
                pg.player.0,
                pg.game_id.0,
                pg.date.format("%Y-%m-%d").to_string(),
                pg.season.0,
                pg.team.0,
                pg.opponent.0,
                pg.is_home,
                pg.playoffs,
                pg.penalties,
                pg.penalties_drawn,
                pg.rebounds_against,
                serde_json::to_string(&pg.slot_counts)?,
                serde_json::to_string(&pg.individual)?,
                serde_json::to_string(&pg.assists)?,
                serde_json::to_string(&pg.on_ice_for)?,
                serde_json::to_string(&pg.on_ice_against)?,
                serde_json::to_string(&pg.toi)?,
                serde_json::to_string(&pg.zone_starts)?,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_player_games(&self, rows: &[PlayerGame]) -> Result<usize> {
        for pg in rows {
            self.upsert_player_game(pg)?;
        }
        Ok(rows.len())
    }

    pub fn get_player_games(&self) -> Result<Vec<PlayerGame>> {
        let mut stmt = self.conn.prepare(
            "SELECT player_id, game_id, date, season, team, opponent, is_home, playoffs,
                    penalties, penalties_drawn, rebounds_against, slot_counts, individual,
                    assists, on_ice_for, on_ice_against, toi, zone_starts
             FROM player_games
             ORDER BY date, game_id, player_id",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_player_game)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_player_game(row: &rusqlite::Row) -> rusqlite::Result<PlayerGame> {
        Ok(PlayerGame {
            player: PlayerId(row.get(0)?),
            game_id: GameId(row.get(1)?),
            date: parse_date(2, &row.get::<_, String>(2)?)?,
            season: Season(row.get(3)?),
            team: TeamCode(row.get(4)?),
            opponent: TeamCode(row.get(5)?),
            is_home: row.get(6)?,
            playoffs: row.get(7)?,
            penalties: row.get(8)?,
            penalties_drawn: row.get(9)?,
            rebounds_against: row.get(10)?,
            slot_counts: parse_json(11, &row.get::<_, String>(11)?)?,
            individual: parse_json(12, &row.get::<_, String>(12)?)?,
            assists: parse_json(13, &row.get::<_, String>(13)?)?,
            on_ice_for: parse_json(14, &row.get::<_, String>(14)?)?,
            on_ice_against: parse_json(15, &row.get::<_, String>(15)?)?,
            toi: parse_json(16, &row.get::<_, String>(16)?)?,
            zone_starts: parse_json(17, &row.get::<_, String>(17)?)?,
        })
    }

    // ==================== Team games ====================

    pub fn upsert_team_game(&self, tg: &TeamGame) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO team_games (team, game_id, date, season, opponent, is_home, playoffs,
                goals_for, goals_against, shootout_goals_for, shootout_goals_against,
                penalties, penalties_drawn, starting_goalie, win, stats_for, stats_against)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(team, game_id) DO UPDATE SET
                date = excluded.date,
                season = excluded.season,
                opponent = excluded.opponent,
                is_home = excluded.is_home,
                playoffs = excluded.playoffs,
                goals_for = excluded.goals_for,
                goals_against = excluded.goals_against,
                shootout_goals_for = excluded.shootout_goals_for,
                shootout_goals_against = excluded.shootout_goals_against,
                penalties = excluded.penalties,
                penalties_drawn = excluded.penalties_drawn,
                starting_goalie = excluded.starting_goalie,
                win = excluded.win,
                stats_for = excluded.stats_for,
                stats_against = excluded.stats_against
            "#,
            params![
                tg.team.0,
                tg.game_id.0,
                tg.date.format("%Y-%m-%d").to_string(),
                tg.season.0,
                tg.opponent.0,
                tg.is_home,
                tg.playoffs,
                tg.goals_for,
                tg.goals_against,
                tg.shootout_goals_for,
                tg.shootout_goals_against,
                tg.penalties,
                tg.penalties_drawn,
                tg.starting_goalie.map(|p| p.0),
                tg.win,
                serde_json::to_string(&tg.stats_for)?,
                serde_json::to_string(&tg.stats_against)?,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_team_games(&self, rows: &[TeamGame]) -> Result<usize> {
        for tg in rows {
            self.upsert_team_game(tg)?;
        }
        Ok(rows.len())
    }

    pub fn get_team_games(&self) -> Result<Vec<TeamGame>> {
        let mut stmt = self.conn.prepare(
            "SELECT team, game_id, date, season, opponent, is_home, playoffs,
                    goals_for, goals_against, shootout_goals_for, shootout_goals_against,
                    penalties, penalties_drawn, starting_goalie, win, stats_for, stats_against
             FROM team_games
             ORDER BY date, game_id, team",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_team_game)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_team_game(row: &rusqlite::Row) -> rusqlite::Result<TeamGame> {
        Ok(TeamGame {
            team: TeamCode(row.get(0)?),
            game_id: GameId(row.get(1)?),
            date: parse_date(2, &row.get::<_, String>(2)?)?,
            season: Season(row.get(3)?),
            opponent: TeamCode(row.get(4)?),
            is_home: row.get(5)?,
            playoffs: row.get(6)?,
            goals_for: row.get(7)?,
            goals_against: row.get(8)?,
            shootout_goals_for: row.get(9)?,
            shootout_goals_against: row.get(10)?,
            penalties: row.get(11)?,
            penalties_drawn: row.get(12)?,
            starting_goalie: row.get::<_, Option<i64>>(13)?.map(PlayerId),
            win: row.get(14)?,
            stats_for: parse_json(15, &row.get::<_, String>(15)?)?,
            stats_against: parse_json(16, &row.get::<_, String>(16)?)?,
        })
    }

    // ==================== Ratings ====================

    pub fn upsert_elo_snapshots(&self, rows: &[EloSnapshot]) -> Result<usize> {
        for snap in rows {
            self.conn.execute(
                r#"
                INSERT INTO elo_ratings (team, game_id, date, season, rating)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(team, game_id) DO UPDATE SET
                    date = excluded.date,
                    season = excluded.season,
                    rating = excluded.rating
                "#,
                params![
                    snap.team.0,
                    snap.game_id.0,
                    snap.date.format("%Y-%m-%d").to_string(),
                    snap.season.0,
                    snap.rating,
                ],
            )?;
        }
        Ok(rows.len())
    }

    pub fn get_elo_snapshots(&self) -> Result<Vec<EloSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT team, game_id, date, season, rating
             FROM elo_ratings
             ORDER BY date, game_id, team",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EloSnapshot {
                    team: TeamCode(row.get(0)?),
                    game_id: GameId(row.get(1)?),
                    date: parse_date(2, &row.get::<_, String>(2)?)?,
                    season: Season(row.get(3)?),
                    rating: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_player_ratings(&self, rows: &[PlayerRating]) -> Result<usize> {
        for rating in rows {
            self.conn.execute(
                r#"
                INSERT INTO player_ratings (player_id, season, date, position,
                    toi, toi_5v5, toi_pp, toi_pk,
                    gc60_5v5, gp60_5v5, gc60_pp, gp60_pk, gi60_pens, gi60)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ON CONFLICT(player_id, season, date) DO UPDATE SET
                    position = excluded.position,
                    toi = excluded.toi,
                    toi_5v5 = excluded.toi_5v5,
                    toi_pp = excluded.toi_pp,
                    toi_pk = excluded.toi_pk,
                    gc60_5v5 = excluded.gc60_5v5,
                    gp60_5v5 = excluded.gp60_5v5,
                    gc60_pp = excluded.gc60_pp,
                    gp60_pk = excluded.gp60_pk,
                    gi60_pens = excluded.gi60_pens,
                    gi60 = excluded.gi60
                "#,
                params![
                    rating.player.0,
                    rating.season.0,
                    rating.date.format("%Y-%m-%d").to_string(),
                    rating.position.code(),
                    rating.toi,
                    rating.toi_5v5,
                    rating.toi_pp,
                    rating.toi_pk,
                    rating.gc60_5v5,
                    rating.gp60_5v5,
                    rating.gc60_pp,
                    rating.gp60_pk,
                    rating.gi60_pens,
                    rating.gi60,
                ],
            )?;
        }
        Ok(rows.len())
    }

    pub fn get_player_ratings(&self) -> Result<Vec<PlayerRating>> {
        let mut stmt = self.conn.prepare(
            "SELECT player_id, season, date, position, toi, toi_5v5, toi_pp, toi_pk,
                    gc60_5v5, gp60_5v5, gc60_pp, gp60_pk, gi60_pens, gi60
             FROM player_ratings
             ORDER BY season, date, player_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let position_code: String = row.get(3)?;
                let position = Position::from_code(&position_code).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        Box::new(PuckError::Parse(format!(
                            "Unknown position code: {}",
                            position_code
                        ))),
                    )
                })?;
                Ok(PlayerRating {
                    player: PlayerId(row.get(0)?),
                    season: Season(row.get(1)?),
                    date: parse_date(2, &row.get::<_, String>(2)?)?,
                    position,
                    toi: row.get(4)?,
                    toi_5v5: row.get(5)?,
                    toi_pp: row.get(6)?,
                    toi_pk: row.get(7)?,
                    gc60_5v5: row.get(8)?,
                    gp60_5v5: row.get(9)?,
                    gc60_pp: row.get(10)?,
                    gp60_pk: row.get(11)?,
                    gi60_pens: row.get(12)?,
                    gi60: row.get(13)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_team_ratings(&self, rows: &[TeamRating]) -> Result<usize> {
        for rating in rows {
            self.conn.execute(
                r#"
                INSERT INTO team_ratings (team, season, date, games, for_mean, against_mean)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(team, season, date) DO UPDATE SET
                    games = excluded.games,
                    for_mean = excluded.for_mean,
                    against_mean = excluded.against_mean
                "#,
                params![
                    rating.team.0,
                    rating.season.0,
                    rating.date.format("%Y-%m-%d").to_string(),
                    rating.games,
                    serde_json::to_string(&rating.for_mean)?,
                    serde_json::to_string(&rating.against_mean)?,
                ],
            )?;
        }
        Ok(rows.len())
    }

    pub fn get_team_ratings(&self) -> Result<Vec<TeamRating>> {
        let mut stmt = self.conn.prepare(
            "SELECT team, season, date, games, for_mean, against_mean
             FROM team_ratings
             ORDER BY season, date, team",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TeamRating {
                    team: TeamCode(row.get(0)?),
                    season: Season(row.get(1)?),
                    date: parse_date(2, &row.get::<_, String>(2)?)?,
                    games: row.get(3)?,
                    for_mean: parse_json(4, &row.get::<_, String>(4)?)?,
                    against_mean: parse_json(5, &row.get::<_, String>(5)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table),
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        };

        let min_date: Option<String> = self
            .conn
            .query_row("SELECT MIN(date) FROM team_games", [], |row| row.get(0))
            .optional()?
            .flatten();
        let max_date: Option<String> = self
            .conn
            .query_row("SELECT MAX(date) FROM team_games", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(DatabaseStats {
            player_game_count: count("player_games")?,
            team_game_count: count("team_games")?,
            elo_count: count("elo_ratings")?,
            player_rating_count: count("player_ratings")?,
            team_rating_count: count("team_ratings")?,
            earliest_game: min_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            latest_game: max_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        })
    }
}

fn parse_date(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_json<T: DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub player_game_count: usize,
    pub team_game_count: usize,
    pub elo_count: usize,
    pub player_rating_count: usize,
    pub team_rating_count: usize,
    pub earliest_game: Option<NaiveDate>,
    pub latest_game: Option<NaiveDate>,
}
