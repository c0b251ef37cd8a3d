//! ytarr Library
//!
//! Matches the episodes Sonarr is missing against videos listed by yt-dlp,
//! downloads the matches and places them in the series folders.

pub mod cli;
pub mod core;
pub mod error;
pub mod generators;
pub mod models;
pub mod preflight;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
