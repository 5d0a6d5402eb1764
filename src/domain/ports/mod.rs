//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - ReasoningCapability: text/JSON generation used for enrichment and analysis
//! - PipelineStore: persistence of run logs, run statuses and suggestions
//!
//! These traits keep the orchestration core independent of concrete
//! providers and storage.

pub mod null_store;
pub mod persistence;
pub mod reasoning;

pub use null_store::NullStore;
pub use persistence::{PersistenceError, PipelineStore};
pub use reasoning::{ChatMessage, ReasoningCapability, ReasoningError, TaskKind};
