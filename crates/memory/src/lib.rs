//! Memory pool, progress store, and ranking implementations for Skein.

pub mod file_backend;
pub mod in_memory;
pub mod lexical;
pub mod merge;
pub mod progress;

pub use file_backend::JsonFilePool;
pub use in_memory::InMemoryPool;
pub use lexical::{FactPool, QueryVariant, parallel_search, tokenize};
pub use merge::{MergeOptions, merge_results};
pub use progress::InMemoryProgressStore;
