//! Infrastructure layer module
//!
//! This module contains the adapters around the orchestration core:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Reasoning provider chain with retries
//! - PipelineStore implementations
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod logging;
pub mod reasoning;
pub mod store;
