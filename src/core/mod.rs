//! Core business logic modules.

pub mod cycle;
pub mod ledger;
pub mod matcher;
pub mod orchestrator;
pub mod parser;
pub mod retry;
