//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - CiBackend: Pipeline trigger, query and cancel
//! - VcsBackend: Branch commits and merges
//! - AgentRuntime: One agent turn at a time
//! - WorkflowStore / HandoffStore: Durable workflow state
//!
//! These traits define the contracts that allow the domain to be independent
//! of specific infrastructure implementations.

pub mod agent_runtime;
pub mod ci_backend;
pub mod vcs_backend;
pub mod workflow_store;

pub use agent_runtime::{
    AgentError, AgentReply, AgentRequest, AgentRuntime, AgentSignal, AgentTools, CompletionReport,
};
pub use ci_backend::{CiBackend, CiError};
pub use vcs_backend::{VcsBackend, VcsError};
pub use workflow_store::{HandoffStore, WorkflowStore};
