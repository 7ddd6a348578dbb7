//! Scripted in-memory backends for tests and dry runs.

pub mod agent;
pub mod ci;
pub mod vcs;

pub use agent::{AgentScript, Invocation, MockAgentRuntime};
pub use ci::{MockCiBackend, PipelineScript};
pub use vcs::{MockCommit, MockVcs};
