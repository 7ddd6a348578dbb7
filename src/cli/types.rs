//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{init::InitArgs, list::ListArgs, start::StartArgs, status::StatusArgs};

#[derive(Parser)]
#[command(name = "shepherd")]
#[command(about = "Shepherd - drives issues through plan, code, test and review", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .shepherd/config.yaml and .shepherd/local.yaml)
    #[arg(short, long, global = true, env = "SHEPHERD_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize Shepherd configuration and database
    Init(InitArgs),

    /// Enrol an issue in a new workflow
    Start(StartArgs),

    /// Show the workflow status of an issue
    Status(StatusArgs),

    /// List workflows
    List(ListArgs),
}
