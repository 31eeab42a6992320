//! Tool backends and schemas for Skein.
//!
//! The catalog itself is closed (see [`skein_core::tool::ToolKind`]). This
//! crate provides what sits behind it: the built-in memory search backend,
//! a closure adapter for connectors owned by other services, and the JSON
//! schemas offered to the model.

pub mod connector;
pub mod memory_search;
pub mod schemas;

pub use connector::FnToolBackend;
pub use memory_search::MemorySearchBackend;
pub use schemas::{schema_for, tool_schemas};
