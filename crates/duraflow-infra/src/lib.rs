//! Infrastructure layer for duraflow.
//!
//! Contains implementations of the repository traits defined in `duraflow-core`
//! (SQLite execution storage), plus the data directory layout and the
//! `config.toml` loader.

pub mod config;
pub mod filesystem;
pub mod sqlite;
