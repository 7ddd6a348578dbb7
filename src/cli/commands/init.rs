//! Implementation of the `shepherd init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::loader::PROJECT_DIR;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config.yaml with defaults
    #[arg(long, short)]
    pub force: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub directories_created: Vec<String>,
    pub config_written: Option<PathBuf>,
    pub database_path: String,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if let Some(path) = &self.config_written {
            lines.push(format!("\nWrote default configuration to {}", path.display()));
        }
        lines.push(format!("Database ready at {}", self.database_path));
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, config: &Config, json_mode: bool) -> Result<()> {
    let project_dir = Path::new(PROJECT_DIR);
    let already_initialized = project_dir.exists();

    let mut directories_created = vec![];
    for dir in [project_dir.to_path_buf(), project_dir.join("logs")] {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            directories_created.push(dir.display().to_string());
        }
    }

    let config_path = project_dir.join("config.yaml");
    let config_written = if args.force || !config_path.exists() {
        let yaml = serde_yaml::to_string(&Config::default())
            .context("Failed to render default configuration")?;
        fs::write(&config_path, yaml)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Some(config_path)
    } else {
        None
    };

    initialize_database(&config.database)
        .await
        .context("Failed to initialize database")?;

    let output_data = InitOutput {
        success: true,
        message: if already_initialized {
            "Project already initialized; schema is up to date.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        directories_created,
        config_written,
        database_path: config.database.path.clone(),
    };

    output(&output_data, json_mode);
    Ok(())
}
