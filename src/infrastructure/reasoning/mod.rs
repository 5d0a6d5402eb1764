//! Reasoning capability adapters
//!
//! Provider-agnostic plumbing around the `ReasoningCapability` port:
//! exponential-backoff retries and a priority-ordered provider chain.

pub mod provider_chain;
pub mod retry;

pub use provider_chain::ProviderChain;
pub use retry::RetryPolicy;
