//! Infrastructure layer module
//!
//! Configuration loading and logging setup. Persistence and backend
//! adapters live under `adapters`.

pub mod config;
pub mod logging;
