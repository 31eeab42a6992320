//! # Skein Core
//!
//! Domain types, traits, and error definitions for the Skein agent
//! orchestration runtime. This crate has **no framework dependencies**; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the completion provider,
//! tool backends, the progress store and the memory pool. Implementations
//! live in their respective crates. This enables:
//! - Swapping implementations at construction time
//! - Easy testing with scripted/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod identity;
pub mod job;
pub mod memory;
pub mod message;
pub mod provider;
pub mod subagent;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{AgentEvent, EventEmitter, EventStream, RunStats};
pub use identity::CallerIdentity;
pub use job::{Artifact, JobStatus, ProgressStore, ScratchpadJob, Step, StepStatus};
pub use memory::{MemoryPoolSource, MemoryRecord, SearchResult};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{CompletionDelta, CompletionProvider, CompletionRequest, ToolSchema, Usage};
pub use subagent::{SubagentDefinition, SubagentRegistry};
pub use tool::{ToolBackend, ToolCall, ToolInvocation, ToolKind, ToolOutcome, ToolPolicy, ToolResult};
