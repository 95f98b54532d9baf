//! Rating engines
//!
//! Team Elo, in-season player and team performance ratings, and the
//! preseason blending that combines them into forward-looking values.

pub mod elo;
pub mod inseason;
pub mod preseason;
pub mod regression;
pub mod team;
