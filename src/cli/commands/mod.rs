//! CLI command implementations.

pub mod check;
pub mod ledger;
pub mod run;
