//! Domain layer for the pipewright orchestration core
//!
//! This module contains the data model and the port traits the core is
//! written against.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{PipelineError, PipelineResult};
