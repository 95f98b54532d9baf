//! Hockey Performance Ratings CLI
//!
//! Turns play-by-play exports into per-player and per-team ratings.

use clap::{Parser, Subcommand};
use puck::{Config, Result};

#[derive(Parser)]
#[command(name = "puck")]
#[command(about = "Player and team performance ratings from play-by-play data", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest event and shift exports into per-game stat rows
    Process {
        /// Play-by-play events (JSON)
        events: String,
        /// Shift records (JSON)
        shifts: String,
        /// Shot probabilities scored offline, one per normalized shot (JSON)
        #[arg(long)]
        xg: String,
    },
    /// Recompute team Elo ratings from stored games
    Elo,
    /// Recompute player and team in-season ratings
    Ratings {
        /// Play-by-play events (JSON), reread for shift overlaps
        events: String,
        /// Shift records (JSON)
        shifts: String,
        /// Write prior-blended projections to this file (JSON)
        #[arg(long)]
        projections: Option<String>,
    },
    /// Show database status
    Status,
    /// Initialize a new project with default config
    Init,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Run command
    let result = match cli.command {
        Commands::Process { events, shifts, xg } => {
            commands::process(&config, &events, &shifts, &xg)
        }
        Commands::Elo => commands::elo(&config),
        Commands::Ratings {
            events,
            shifts,
            projections,
        } => commands::ratings(&config, &events, &shifts, projections.as_deref()),
        Commands::Status => commands::status(&config),
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use std::collections::HashMap;

    use chrono::NaiveDate;

    use super::*;
    use puck::aggregate::adjustments::AdjustmentTable;
    use puck::aggregate::{
        aggregate_player_games, aggregate_team_games, mark_playoffs, positions, PlayerGame,
    };
    use puck::data::{load_events, load_shifts, Database};
    use puck::events::{attach_xg, normalize};
    use puck::predict::PrecomputedShotModel;
    use puck::ratings::elo::{EloGame, EloRatings};
    use puck::ratings::inseason::{player_inseason_ratings, PlayerRating};
    use puck::ratings::preseason::{project_goalie, project_skater};
    use puck::ratings::team::team_inseason_ratings;
    use puck::shifts::{compute_overlaps, strength_segments, ShiftOverlaps};
    use puck::{GameId, PlayerId, Position, PuckError, RawEvent, Shift, TeamCode};

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all("data")?;
        println!("Created data/ directory");

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'puck process <events.json> <shifts.json> --xg <xg.json>'");
        println!("  3. Run 'puck elo' and 'puck ratings <events.json> <shifts.json>'");

        Ok(())
    }

    pub fn process(
        config: &Config,
        events_path: &str,
        shifts_path: &str,
        xg_path: &str,
    ) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;

        println!("Loading events from {}...", events_path);
        let events = load_events(events_path)?;
        println!("  {} events", events.len());

        println!("Loading shifts from {}...", shifts_path);
        let shifts = load_shifts(shifts_path)?;
        println!("  {} shifts", shifts.len());

        if events.is_empty() {
            return Err(PuckError::Config(
                "No events in input file. Check the export.".to_string(),
            ));
        }

        println!("Normalizing shots...");
        let shot_events = normalize(&events);
        println!("  {} shot attempts", shot_events.len());

        let model = PrecomputedShotModel::load(xg_path)?;
        let scored = attach_xg(shot_events, &model)?;

        let table = load_adjustments(config);
        let overlaps = overlaps_for(&events, &shifts, config);

        println!("Aggregating per-game rows...");
        let mut player_games = aggregate_player_games(&events, &scored, &overlaps.toi, &table);
        let mut team_games = aggregate_team_games(&events, &scored, &table);
        mark_playoffs(&mut player_games, &mut team_games);

        let stored_players = db.upsert_player_games(&player_games)?;
        let stored_teams = db.upsert_team_games(&team_games)?;
        println!("Stored {} player-game rows", stored_players);
        println!("Stored {} team-game rows", stored_teams);

        Ok(())
    }

    pub fn elo(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;

        let team_games = db.get_team_games()?;
        if team_games.is_empty() {
            return Err(PuckError::Config(
                "No games in database. Run 'puck process' first.".to_string(),
            ));
        }

        let games = EloGame::from_team_games(&team_games);
        println!("Running Elo over {} games...", games.len());

        let mut ratings = EloRatings::default();
        let snapshots = ratings.run(&games)?;
        let stored = db.upsert_elo_snapshots(&snapshots)?;
        println!("Stored {} entering-rating snapshots", stored);

        Ok(())
    }

    pub fn ratings(
        config: &Config,
        events_path: &str,
        shifts_path: &str,
        projections_path: Option<&str>,
    ) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;

        let player_games = db.get_player_games()?;
        let team_games = db.get_team_games()?;
        if player_games.is_empty() {
            return Err(PuckError::Config(
                "No player games in database. Run 'puck process' first.".to_string(),
            ));
        }

        println!("Rebuilding shift overlaps from {}...", shifts_path);
        let events = load_events(events_path)?;
        let shifts = load_shifts(shifts_path)?;
        let overlaps = overlaps_for(&events, &shifts, config);
        println!("  {} overlap rows", overlaps.rows.len());

        let position_map = positions(&player_games);

        println!("Computing player in-season ratings...");
        let player_ratings = player_inseason_ratings(&player_games, &overlaps.rows, &position_map);
        let stored = db.upsert_player_ratings(&player_ratings)?;
        println!("Stored {} player rating rows", stored);

        println!("Computing team in-season ratings...");
        let team_ratings = team_inseason_ratings(&team_games);
        let stored = db.upsert_team_ratings(&team_ratings)?;
        println!("Stored {} team rating rows", stored);

        if let Some(path) = projections_path {
            write_projections(path, &player_games, &player_ratings)?;
        }

        Ok(())
    }

    /// Blend each rating row with its positional prior, weighted by career
    /// games played entering the date, and write the projections as JSON.
    fn write_projections(
        path: &str,
        player_games: &[PlayerGame],
        player_ratings: &[PlayerRating],
    ) -> Result<()> {
        let mut appearances: HashMap<PlayerId, Vec<NaiveDate>> = HashMap::new();
        for pg in player_games {
            appearances.entry(pg.player).or_default().push(pg.date);
        }
        for dates in appearances.values_mut() {
            dates.sort_unstable();
        }

        let mut rows = Vec::with_capacity(player_ratings.len());
        for rating in player_ratings {
            let played = appearances
                .get(&rating.player)
                .map_or(0, |dates| dates.partition_point(|d| *d < rating.date));
            let game_num = played as u32 + 1;
            let value = match rating.position {
                Position::Goalie => {
                    serde_json::json!({ "gi60": project_goalie(game_num, Some(rating)) })
                }
                _ => serde_json::to_value(project_skater(
                    rating.position,
                    game_num,
                    Some(rating),
                ))?,
            };
            rows.push(serde_json::json!({
                "player": rating.player,
                "date": rating.date,
                "position": rating.position.code(),
                "game_num": game_num,
                "projection": value,
            }));
        }

        std::fs::write(path, serde_json::to_string_pretty(&rows)?)?;
        println!("Wrote {} blended projections to {}", rows.len(), path);

        Ok(())
    }

    pub fn status(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let stats = db.get_stats()?;

        println!("Database Status");
        println!("───────────────────────────────");
        println!("  Path:           {}", config.data.database_path);
        println!("  Player games:   {}", stats.player_game_count);
        println!("  Team games:     {}", stats.team_game_count);
        println!("  Elo snapshots:  {}", stats.elo_count);
        println!("  Player ratings: {}", stats.player_rating_count);
        println!("  Team ratings:   {}", stats.team_rating_count);
        if let (Some(earliest), Some(latest)) = (stats.earliest_game, stats.latest_game) {
            println!("  Range:          {} to {}", earliest, latest);
        }

        Ok(())
    }

    fn load_adjustments(config: &Config) -> AdjustmentTable {
        match AdjustmentTable::load(&config.data.adjustments_path) {
            Ok(table) => table,
            Err(_) => {
                println!(
                    "No adjustment table at {}; using neutral factors",
                    config.data.adjustments_path
                );
                AdjustmentTable::default()
            }
        }
    }

    fn overlaps_for(events: &[RawEvent], shifts: &[Shift], config: &Config) -> ShiftOverlaps {
        let segments = strength_segments(events);
        let home_teams: HashMap<GameId, TeamCode> = events
            .iter()
            .map(|ev| (ev.game_id, ev.home_team.clone()))
            .collect();
        compute_overlaps(shifts, &segments, &home_teams, config.processing.batch_size)
    }
}
