//! Data ingestion and storage
//!
//! JSON feed loading and SQLite database management.

pub mod database;

pub use database::{Database, DatabaseStats};

use std::fs;
use std::path::Path;

use crate::{RawEvent, Result, Shift};

/// Load play-by-play events from a JSON array file.
pub fn load_events<P: AsRef<Path>>(path: P) -> Result<Vec<RawEvent>> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Load shift records from a JSON array file.
pub fn load_shifts<P: AsRef<Path>>(path: P) -> Result<Vec<Shift>> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
