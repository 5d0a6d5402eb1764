//! PipelineStore adapters

pub mod jsonl;
pub mod memory;

pub use jsonl::{JsonlStore, RunRecord};
pub use memory::InMemoryStore;
