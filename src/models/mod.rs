//! Data models.

pub mod config;
pub mod ledger;
pub mod media;
pub mod report;
