//! Operator command-line interface.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

use anyhow::Result;
use sqlx::SqlitePool;

use crate::adapters::sqlite::initialize_database;
use crate::domain::models::Config;

/// Open the configured database, applying pending migrations.
pub(crate) async fn open_database(config: &Config) -> Result<SqlitePool> {
    use anyhow::Context;

    initialize_database(&config.database)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))
}

/// Print a command error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        let body = serde_json::json!({ "error": err.to_string(), "causes": chain });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
