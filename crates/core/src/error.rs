//! Error types for the Skein domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Skein operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Progress store errors ---
    #[error("Progress store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors raised while validating or executing a single tool call.
///
/// Every variant ends up as an error tool result for the model to react to;
/// none of them aborts the run on its own.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown subagent: {0}")]
    UnknownSubagent(String),

    #[error("Tool not allowed in this run: {0}")]
    NotAllowed(String),

    #[error("Recursion depth exceeded: depth {depth} reached the limit of {max}")]
    DepthExceeded { depth: u32, max: u32 },

    #[error("Missing required argument '{argument}' for tool {tool_name}")]
    MissingArgument { tool_name: String, argument: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool backend not configured: {0}")]
    BackendUnavailable(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },
}

impl ToolError {
    /// Whether the gateway may attempt this call again.
    ///
    /// Validation failures are deterministic, so only backend failures and
    /// timeouts qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExecutionFailed { .. } | Self::Timeout { .. })
    }
}
