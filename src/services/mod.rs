//! Services that carry the workflow: retry accounting, hand-off caching,
//! pipeline tracking, agent execution and the per-issue supervisor.

pub mod agent_executor;
pub mod context_cache;
pub mod pipeline_monitor;
pub mod resilient_ci;
pub mod retry_governor;
pub mod workflow_supervisor;

pub use agent_executor::{parse_completion, AgentExecutor, Cancelled, COMPLETION_MARKER};
pub use context_cache::{CacheError, ContextCache};
pub use pipeline_monitor::{EventDisposition, MonitorError, PipelineMonitor};
pub use resilient_ci::ResilientCiClient;
pub use retry_governor::RetryGovernor;
pub use workflow_supervisor::{enrol_issue, Backends, StatusReport, Transition, WorkflowSupervisor};
