//! Shepherd - issue delivery orchestrator
//!
//! Shepherd drives each issue through a fixed sequence of agent stages
//! (plan, code, test, review), binds every commit an agent pushes to a CI
//! pipeline run, and retries failed stages within a bounded budget.
//!
//! # Architecture
//!
//! The crate follows a hexagonal layout:
//!
//! - **Domain Layer** (`domain`): models, the transition table and ports
//! - **Service Layer** (`services`): supervisor, pipeline monitor, agent
//!   executor, context cache and retry governor
//! - **Adapters** (`adapters`): SQLite and in-memory stores, test doubles
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use shepherd::{Backends, WorkflowSupervisor};
//!
//! let supervisor = Arc::new(WorkflowSupervisor::new(config, backends));
//! supervisor.start_workflow(&"I1".into()).await?;
//! supervisor.run_workflow(&"I1".into()).await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    Config, FailureClass, Issue, IssueId, LastOutcome, Outcome, PipelineEvent, PipelineId,
    PipelineOutcome, PipelineRun, PipelineStatus, Stage, StageOutput, StageResult, Trigger,
};
pub use domain::ports::{AgentRuntime, CiBackend, HandoffStore, VcsBackend, WorkflowStore};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::logging::LoggerImpl;
pub use services::{
    AgentExecutor, Backends, ContextCache, PipelineMonitor, RetryGovernor, StatusReport,
    Transition, WorkflowSupervisor,
};
