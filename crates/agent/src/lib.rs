//! The Skein orchestration runtime.
//!
//! Given a user message, the [`Orchestrator`] drives a model through an
//! iterative tool-calling conversation:
//!
//! 1. **Retrieve** relevant memory and inject it into the system prompt
//! 2. **Stream** a completion, surfacing text and reasoning as events
//! 3. **Execute** requested tool calls concurrently through the [`ToolGateway`]
//! 4. **Delegate** `task` calls to nested subagent runs
//! 5. **Repeat** until the model answers without tools or the budget runs out
//!
//! Progress is recorded in a scratchpad job and streamed to the caller as
//! [`skein_core::AgentEvent`] values.

pub mod context;
pub mod dispatcher;
pub mod gateway;
pub mod orchestrator;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{
    ContextCache, ContextRetriever, QueryAnalysis, QueryClassifier, QueryRewriter, QueryType,
    RetrievalPath, RetrievedContext,
};
pub use dispatcher::SUBAGENT_RESULT_KIND;
pub use gateway::{
    CallFrame, RetryPolicy, SubagentLauncher, SubagentRun, ToolBackends, ToolExecution,
    ToolGateway,
};
pub use orchestrator::{Orchestrator, RunContext, RunOutcome, RunSettings};
