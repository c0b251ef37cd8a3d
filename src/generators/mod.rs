//! Library path and filename generators.

pub mod filename;
pub mod folder;
